// Copyright 2019 Zhizhesihai (Beijing) Technology Limited.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// See the License for the specific language governing permissions and
// limitations under the License.

/// A point-in-time commit as the deletion policy sees it: the numbered
/// segments file plus every file that commit references. Policies mark
/// commits deleted; the file deleter then drops whatever only those
/// commits referenced.
#[derive(Clone, Debug)]
pub struct IndexCommitPoint {
    pub segments_file_name: String,
    pub generation: i64,
    pub files: Vec<String>,
    deleted: bool,
}

impl IndexCommitPoint {
    pub fn new(segments_file_name: String, generation: i64, files: Vec<String>) -> Self {
        IndexCommitPoint {
            segments_file_name,
            generation,
            files,
            deleted: false,
        }
    }

    pub fn delete(&mut self) {
        self.deleted = true;
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }
}

/// Decides which commit points outlive a checkpoint. Called once when the
/// writer opens (over whatever commits the directory holds) and after
/// every completed commit; commits arrive oldest first.
pub trait IndexDeletionPolicy: Send + Sync {
    fn on_init(&self, commits: &mut Vec<IndexCommitPoint>) {
        self.on_commit(commits)
    }

    fn on_commit(&self, commits: &mut Vec<IndexCommitPoint>);
}

/// The default policy: the newest commit is the only one worth keeping.
#[derive(Clone, Copy, Debug, Default)]
pub struct KeepOnlyLastCommitDeletionPolicy;

impl IndexDeletionPolicy for KeepOnlyLastCommitDeletionPolicy {
    fn on_commit(&self, commits: &mut Vec<IndexCommitPoint>) {
        let len = commits.len();
        if len > 1 {
            for commit in &mut commits[..len - 1] {
                commit.delete();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_newest() {
        let policy = KeepOnlyLastCommitDeletionPolicy;
        let mut commits = vec![
            IndexCommitPoint::new("segments_1".into(), 1, vec![]),
            IndexCommitPoint::new("segments_2".into(), 2, vec![]),
            IndexCommitPoint::new("segments_3".into(), 3, vec![]),
        ];
        policy.on_commit(&mut commits);
        assert!(commits[0].is_deleted());
        assert!(commits[1].is_deleted());
        assert!(!commits[2].is_deleted());
    }

    #[test]
    fn single_commit_survives() {
        let policy = KeepOnlyLastCommitDeletionPolicy;
        let mut commits = vec![IndexCommitPoint::new("segments_1".into(), 1, vec![])];
        policy.on_init(&mut commits);
        assert!(!commits[0].is_deleted());
    }
}
