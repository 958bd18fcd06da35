//! Session identifiers
//!
//! Every physical connection gets a `SessionId` so log lines from the
//! reader, writer and watchers of one session can be correlated.

use nanoid::nanoid;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

use crate::timing::millis;

/// Identifier of one streaming session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(generate_id_with_prefix("SES"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `{prefix}-{unix millis}-{8 random chars}`
fn generate_id_with_prefix(prefix: &str) -> String {
    format!("{prefix}-{}-{}", millis(), nanoid!(8))
}
