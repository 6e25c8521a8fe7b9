/// Turns cumulative text snapshots into deltas.
#[derive(Debug, Default, Clone)]
pub struct SnapshotDiff {
    previous: String,
}

impl SnapshotDiff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `snapshot` and return the text it adds over the previous one.
    ///
    /// Unchanged or shorter snapshots yield `None`. A snapshot that does not
    /// extend the previous one is cut at the previous length in characters.
    pub fn advance(&mut self, snapshot: &str) -> Option<String> {
        let delta = match snapshot.strip_prefix(self.previous.as_str()) {
            Some(rest) => rest.to_string(),
            None => snapshot
                .chars()
                .skip(self.previous.chars().count())
                .collect(),
        };
        self.previous.clear();
        self.previous.push_str(snapshot);
        (!delta.is_empty()).then_some(delta)
    }

    /// Latest snapshot.
    pub fn text(&self) -> &str {
        &self.previous
    }
}
