use serde::{Deserialize, Serialize};

/// Directed, labelled link between two stored atoms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bond {
    pub to: String,
    pub relation: String,
}

impl Bond {
    pub fn new(to: impl Into<String>, relation: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            relation: relation.into(),
        }
    }
}
