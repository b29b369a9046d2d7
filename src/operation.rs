use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;

/// Task selected for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum OperationKind {
    Open,
    Close,
    Chill,
    Snapshot,
    #[value(name = "snapdelete")]
    SnapDelete,
    Delete,
}

impl OperationKind {
    pub const ALL: [OperationKind; 6] = [
        OperationKind::Open,
        OperationKind::Close,
        OperationKind::Chill,
        OperationKind::Snapshot,
        OperationKind::SnapDelete,
        OperationKind::Delete,
    ];

    /// Key used in `settings.indices.<prefix>.skip`.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Open => "open",
            OperationKind::Close => "close",
            OperationKind::Chill => "chill",
            OperationKind::Snapshot => "snapshot",
            OperationKind::SnapDelete => "snapdelete",
            OperationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|op| op.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| anyhow::anyhow!("unknown task '{wanted}'"))
    }
}
