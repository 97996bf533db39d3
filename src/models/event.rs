//! Represents the inbound batch-publish event and its work items.

use crate::models::image_config::{ImageConfigOverrides, ImageFormat};
use serde::{Deserialize, Serialize};

/// Event type marker accepted by the QR image stage.
pub const QR_IMAGE_EVENT_ID: &str = "BE_QR_IMAGE_GENERATOR";

/// One unit of work consumed from the upstream message source.
///
/// Events are never mutated after deserialization; every stage of the
/// pipeline borrows it.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Event type marker, must equal [`QR_IMAGE_EVENT_ID`].
    #[serde(default)]
    pub eid: String,

    /// Batch identifier. Absent or blank means no archive is produced.
    #[serde(default)]
    pub process_id: Option<String>,

    /// Identifier of the content the codes belong to.
    #[serde(default)]
    pub object_id: String,

    /// Output image format; wins over `imageConfig.imageFormat` when both are set.
    #[serde(default)]
    pub image_format: Option<ImageFormat>,

    /// Rendering options supplied with the event.
    #[serde(default, alias = "config")]
    pub image_config: ImageConfigOverrides,

    /// Ordered work items.
    #[serde(default)]
    pub dialcodes: Vec<WorkItem>,

    /// Logical container the archive is uploaded to.
    #[serde(default)]
    pub storage_container: String,

    /// Path prefix inside the container.
    #[serde(default)]
    pub storage_path: String,

    /// Archive base name; defaults to the process id.
    #[serde(default)]
    pub storage_file_name: Option<String>,

    /// Source partition, carried for error reports only.
    #[serde(default)]
    pub partition: i32,

    /// Source offset, carried for error reports only.
    #[serde(default)]
    pub offset: i64,
}

impl Event {
    /// The trimmed process id, or `None` when it is absent or blank.
    pub fn process_id(&self) -> Option<&str> {
        non_blank(self.process_id.as_deref())
    }

    /// Archive file name: `<storageFileName or processId>.zip`. Path
    /// separators are replaced so the name stays a single segment.
    pub fn archive_name(&self, process_id: &str) -> String {
        let base = non_blank(self.storage_file_name.as_deref()).unwrap_or(process_id);
        let flat: String = base
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        format!("{}.zip", flat)
    }
}

/// A single code to publish, either already rendered somewhere or to be generated.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkItem {
    /// Code identifier; also the output file stem.
    #[serde(default)]
    pub id: String,

    /// URL of a previously rendered image.
    #[serde(default)]
    pub location: Option<String>,

    /// Payload encoded in the QR code. Defaults to `id`.
    #[serde(default)]
    pub data: Option<String>,

    /// Label printed under the code. Defaults to `id`.
    #[serde(default)]
    pub text: Option<String>,
}

impl WorkItem {
    pub fn existing_location(&self) -> Option<&str> {
        non_blank(self.location.as_deref())
    }

    pub fn payload(&self) -> &str {
        self.data.as_deref().unwrap_or(&self.id)
    }

    pub fn label(&self) -> &str {
        self.text.as_deref().unwrap_or(&self.id)
    }

    /// Local file name `<id>.<ext>`.
    ///
    /// Returns `None` when the id is blank or could escape the scratch
    /// directory (separators, `.` or `..`, control characters).
    pub fn file_name(&self, format: ImageFormat) -> Option<String> {
        let id = self.id.trim();
        if id.is_empty() || id == "." || id == ".." {
            return None;
        }
        if id
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_control())
        {
            return None;
        }
        Some(format!("{}.{}", id, format.extension()))
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
