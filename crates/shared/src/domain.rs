use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(TenantId);
id_newtype!(WorkflowId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Member,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Member => "member",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "owner" => Some(Role::Owner),
            "member" => Some(Role::Member),
            _ => None,
        }
    }
}

/// Lifecycle state of a workflow.
///
/// Decoding is lenient: anything other than `"erledigt"` is the working
/// state, so a toggle always has a well-defined successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WorkflowStatus {
    InArbeit,
    Erledigt,
}

impl WorkflowStatus {
    pub const IN_ARBEIT: &'static str = "in_arbeit";
    pub const ERLEDIGT: &'static str = "erledigt";

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStatus::InArbeit => Self::IN_ARBEIT,
            WorkflowStatus::Erledigt => Self::ERLEDIGT,
        }
    }

    pub fn parse(raw: &str) -> Self {
        if raw == Self::ERLEDIGT {
            WorkflowStatus::Erledigt
        } else {
            WorkflowStatus::InArbeit
        }
    }

    /// Exact wire value only; request bodies go through this.
    pub fn parse_strict(raw: &str) -> Option<Self> {
        match raw {
            Self::IN_ARBEIT => Some(WorkflowStatus::InArbeit),
            Self::ERLEDIGT => Some(WorkflowStatus::Erledigt),
            _ => None,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            WorkflowStatus::Erledigt => WorkflowStatus::InArbeit,
            WorkflowStatus::InArbeit => WorkflowStatus::Erledigt,
        }
    }

    pub fn is_done(self) -> bool {
        self == WorkflowStatus::Erledigt
    }
}

impl From<String> for WorkflowStatus {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<WorkflowStatus> for String {
    fn from(value: WorkflowStatus) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub tenant_id: TenantId,
    pub title: String,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
