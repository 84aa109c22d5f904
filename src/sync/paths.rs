/// Collection names under the configured root.
pub const RECORDS: &str = "milkRecords";
pub const NOTES: &str = "notes";
pub const TRASH: &str = "trash";

/// Canonical remote path construction.
///
/// Every reader, writer and drainer goes through this builder, so a
/// queued deletion can never address a different path than the write it
/// undoes. Paths are never reused across entity kinds.
#[derive(Debug, Clone)]
pub struct PathBuilder {
    root: String,
}

impl PathBuilder {
    /// `root` is the prefix all collections live under, typically scoped
    /// to the signed-in user (e.g. `milkData/<uid>`).
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into().trim_matches('/').to_string(),
        }
    }

    pub fn collection(&self, name: &str) -> String {
        if self.root.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.root, name)
        }
    }

    pub fn records(&self) -> String {
        self.collection(RECORDS)
    }

    pub fn notes(&self) -> String {
        self.collection(NOTES)
    }

    pub fn trash_bin(&self) -> String {
        self.collection(TRASH)
    }

    pub fn record(&self, id: &str) -> String {
        format!("{}/{}", self.records(), id)
    }

    pub fn note(&self, id: &str) -> String {
        format!("{}/{}", self.notes(), id)
    }

    pub fn trash(&self, id: &str) -> String {
        format!("{}/{}", self.trash_bin(), id)
    }
}
