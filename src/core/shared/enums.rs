//! Domain enums shared by every resource module.
//!
//! Values are persisted as upper-case strings in VARCHAR columns, matching the
//! CHECK constraints in the initial migration.

use serde::{Deserialize, Serialize};

// ============================================================================
// USER ROLE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Customer,
    Agent,
    Manager,
    Admin,
}

impl UserRole {
    pub const STAFF: [UserRole; 3] = [Self::Agent, Self::Manager, Self::Admin];
    pub const LEADS: [UserRole; 2] = [Self::Manager, Self::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "CUSTOMER",
            Self::Agent => "AGENT",
            Self::Manager => "MANAGER",
            Self::Admin => "ADMIN",
        }
    }

    pub fn is_staff(&self) -> bool {
        !matches!(self, Self::Customer)
    }
}

impl Default for UserRole {
    fn default() -> Self {
        Self::Customer
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "CUSTOMER" => Ok(Self::Customer),
            "AGENT" => Ok(Self::Agent),
            "MANAGER" => Ok(Self::Manager),
            "ADMIN" => Ok(Self::Admin),
            _ => Err(format!("Unknown user role: {}", s)),
        }
    }
}

// ============================================================================
// TICKET STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Open,
    InProgress,
    Pending,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub const ALL: [TicketStatus; 5] = [
        Self::Open,
        Self::InProgress,
        Self::Pending,
        Self::Resolved,
        Self::Closed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::InProgress => "IN_PROGRESS",
            Self::Pending => "PENDING",
            Self::Resolved => "RESOLVED",
            Self::Closed => "CLOSED",
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Resolved | Self::Closed)
    }
}

impl Default for TicketStatus {
    fn default() -> Self {
        Self::Open
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TicketStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().replace([' ', '-'], "_").as_str() {
            "OPEN" => Ok(Self::Open),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "PENDING" => Ok(Self::Pending),
            "RESOLVED" => Ok(Self::Resolved),
            "CLOSED" => Ok(Self::Closed),
            _ => Err(format!("Unknown ticket status: {}", s)),
        }
    }
}

// ============================================================================
// TICKET PRIORITY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl TicketPriority {
    pub const ALL: [TicketPriority; 4] = [Self::Low, Self::Medium, Self::High, Self::Urgent];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Urgent => "URGENT",
        }
    }

    /// Ordering key used by the ticket sort: LOW=0 .. URGENT=3.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
            Self::Urgent => 3,
        }
    }

    /// Maps arbitrary text (model output, legacy rows) onto a known priority.
    /// Anything unrecognised becomes MEDIUM.
    pub fn clamp_from(value: &str) -> Self {
        match value.trim().to_uppercase().as_str() {
            "LOW" | "MINOR" => Self::Low,
            "HIGH" | "MAJOR" | "IMPORTANT" => Self::High,
            "URGENT" | "CRITICAL" | "BLOCKER" => Self::Urgent,
            _ => Self::Medium,
        }
    }
}

impl Default for TicketPriority {
    fn default() -> Self {
        Self::Medium
    }
}

impl std::fmt::Display for TicketPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TicketPriority {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            "URGENT" => Ok(Self::Urgent),
            _ => Err(format!("Unknown ticket priority: {}", s)),
        }
    }
}

// ============================================================================
// MARKETPLACE CONVERSATION STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketplaceStatus {
    Pending,
    Processed,
    Failed,
    TicketCreated,
}

impl MarketplaceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processed => "PROCESSED",
            Self::Failed => "FAILED",
            Self::TicketCreated => "TICKET_CREATED",
        }
    }
}

impl std::fmt::Display for MarketplaceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MarketplaceStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "PROCESSED" => Ok(Self::Processed),
            "FAILED" => Ok(Self::Failed),
            "TICKET_CREATED" => Ok(Self::TicketCreated),
            _ => Err(format!("Unknown marketplace status: {}", s)),
        }
    }
}

// ============================================================================
// AUDIT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Assign,
    StatusChange,
    RoleChange,
    MemberAdd,
    MemberRemove,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Assign => "ASSIGN",
            Self::StatusChange => "STATUS_CHANGE",
            Self::RoleChange => "ROLE_CHANGE",
            Self::MemberAdd => "MEMBER_ADD",
            Self::MemberRemove => "MEMBER_REMOVE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    Ticket,
    Message,
    Team,
    User,
    MarketplaceConversation,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ticket => "TICKET",
            Self::Message => "MESSAGE",
            Self::Team => "TEAM",
            Self::User => "USER",
            Self::MarketplaceConversation => "MARKETPLACE_CONVERSATION",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing_is_case_insensitive() {
        assert_eq!("agent".parse::<UserRole>(), Ok(UserRole::Agent));
        assert_eq!(" ADMIN ".parse::<UserRole>(), Ok(UserRole::Admin));
        assert!("owner".parse::<UserRole>().is_err());
    }

    #[test]
    fn test_staff_roles() {
        assert!(!UserRole::Customer.is_staff());
        for role in UserRole::STAFF {
            assert!(role.is_staff());
        }
    }

    #[test]
    fn test_status_parsing_accepts_ui_spellings() {
        assert_eq!("in progress".parse::<TicketStatus>(), Ok(TicketStatus::InProgress));
        assert_eq!("in-progress".parse::<TicketStatus>(), Ok(TicketStatus::InProgress));
        assert!(!TicketStatus::Closed.is_active());
        assert!(TicketStatus::Pending.is_active());
    }

    #[test]
    fn test_priority_clamp() {
        assert_eq!(TicketPriority::clamp_from("urgent"), TicketPriority::Urgent);
        assert_eq!(TicketPriority::clamp_from("Critical"), TicketPriority::Urgent);
        assert_eq!(TicketPriority::clamp_from(""), TicketPriority::Medium);
        assert_eq!(TicketPriority::clamp_from("p0!!"), TicketPriority::Medium);
        assert!(TicketPriority::Urgent.rank() > TicketPriority::High.rank());
    }

    #[test]
    fn test_serde_uses_wire_names() {
        let json = serde_json::to_string(&TicketStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");
        let role: UserRole = serde_json::from_str("\"MANAGER\"").unwrap();
        assert_eq!(role, UserRole::Manager);
    }
}
