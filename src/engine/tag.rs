// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Deploy tag naming.

use chrono::{Local, NaiveDateTime};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Message of every annotated deploy tag.
pub const TAG_MESSAGE: &str = "GitDeploy Tag.";

/// Timestamp layout of deploy tags.
pub const TAG_TIMESTAMP: &str = "%Y%m%d-%H%M%S";

/// Lifecycle event a deploy tag marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagPhase {
    Start,
    Sync,
    Revert,
}

impl TagPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Sync => "sync",
            Self::Revert => "revert",
        }
    }
}

impl Display for TagPhase {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

/// Deploy tag name of the form `<prefix>-<phase>-<YYYYMMDD-HHMMSS>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployTag {
    prefix: String,
    phase: TagPhase,
    timestamp: NaiveDateTime,
}

impl DeployTag {
    pub fn new(prefix: impl Into<String>, phase: TagPhase, timestamp: NaiveDateTime) -> Self {
        Self {
            prefix: prefix.into(),
            phase,
            timestamp,
        }
    }

    /// Deploy tag stamped with current local time.
    pub fn now(prefix: impl Into<String>, phase: TagPhase) -> Self {
        Self::new(prefix, phase, Local::now().naive_local())
    }

    pub fn phase(&self) -> TagPhase {
        self.phase
    }
}

impl Display for DeployTag {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(
            fmt,
            "{}-{}-{}",
            self.prefix,
            self.phase,
            self.timestamp.format(TAG_TIMESTAMP)
        )
    }
}
