use derive_more::Display;
use fanout_destination::{DestinationId, DestinationResult, ErrorDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

/// Queue-unique, monotonically increasing item identifier.
#[derive(Debug, Clone, Copy, Display, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueItemId(pub(crate) u64);
impl QueueItemId {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Overall lifecycle of one queued file.
///
/// `Pending -> Running -> Success | Error`, and `Error -> Pending` only
/// through an explicit reset.
#[derive(Debug, Clone, Copy, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    #[display("pending")]
    Pending,
    #[display("running")]
    Running,
    #[display("success")]
    Success,
    #[display("error")]
    Error,
}
impl QueueStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

/// Lifecycle of one destination's slot within an item.
#[derive(Debug, Clone, Copy, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    #[display("pending")]
    Pending,
    #[display("uploading")]
    Uploading,
    #[display("success")]
    Success,
    #[display("failed")]
    Failed,
}
impl SlotStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

/// Progress of a single destination for a single item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationProgress {
    pub status: SlotStatus,
    pub percent: u8,
    pub step: Option<String>,
    pub url: Option<String>,
    pub error: Option<ErrorDescriptor>,
}
impl Default for DestinationProgress {
    fn default() -> Self {
        Self {
            status: SlotStatus::Pending,
            percent: 0,
            step: None,
            url: None,
            error: None,
        }
    }
}
impl DestinationProgress {
    pub(crate) fn apply_result(&mut self, result: &DestinationResult) {
        self.url = result.url().map(str::to_string);
        self.error = result.error().cloned();
        match self.error {
            Some(_) => self.status = SlotStatus::Failed,
            None => {
                self.status = SlotStatus::Success;
                self.percent = 100;
            },
        }
    }
}

/// One file's upload lifecycle across all of its destinations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: QueueItemId,
    pub file_path: PathBuf,
    pub file_name: String,
    /// Destinations enabled for this item, in the order they were requested.
    pub destinations: Vec<DestinationId>,
    pub progress: BTreeMap<DestinationId, DestinationProgress>,
    pub status: QueueStatus,
    pub primary_url: Option<String>,
    pub error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}
impl QueueItem {
    pub(crate) fn new(id: QueueItemId, file_path: &Path, destinations: Vec<DestinationId>) -> Self {
        let now = OffsetDateTime::now_utc();
        let file_name = file_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_path.display().to_string());
        let progress = destinations.iter().map(|d| (d.clone(), DestinationProgress::default())).collect();
        Self {
            id,
            file_path: file_path.to_path_buf(),
            file_name,
            destinations,
            progress,
            status: QueueStatus::Pending,
            primary_url: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Average percentage across all destinations.
    pub fn overall_percent(&self) -> u8 {
        if self.progress.is_empty() {
            return 0;
        }
        let total: u32 = self.progress.values().map(|p| u32::from(p.percent)).sum();
        (total / self.progress.len() as u32) as u8
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = OffsetDateTime::now_utc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanout_destination::{FailureCode, UploadReceipt};

    #[test]
    fn test_new_item_has_pending_slot_per_destination() {
        let item = QueueItem::new(QueueItemId(1), Path::new("/tmp/cat.png"), vec!["smms".into(), "r2".into()]);
        assert_eq!(item.file_name, "cat.png");
        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.progress.len(), 2);
        assert!(item.progress.values().all(|p| p.status == SlotStatus::Pending));
        assert_eq!(item.overall_percent(), 0);
    }

    #[test]
    fn test_apply_result() {
        let mut slot = DestinationProgress { percent: 40, ..Default::default() };
        slot.apply_result(&DestinationResult::success("r2".into(), UploadReceipt::new("https://x/1.png", 1)));
        assert_eq!(slot.status, SlotStatus::Success);
        assert_eq!((slot.percent, slot.url.as_deref()), (100, Some("https://x/1.png")));

        let mut slot = DestinationProgress { percent: 40, ..Default::default() };
        let error = ErrorDescriptor::new(FailureCode::Auth, "cookie expired", false);
        slot.apply_result(&DestinationResult::failure("weibo".into(), error.clone()));
        assert_eq!((slot.status, slot.percent), (SlotStatus::Failed, 40));
        assert_eq!(slot.error, Some(error));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&QueueStatus::Running).unwrap(), "\"running\"");
        assert!(QueueStatus::Error.is_terminal());
        assert!(!SlotStatus::Uploading.is_terminal());
    }
}
