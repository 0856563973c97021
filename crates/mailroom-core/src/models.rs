//! Core domain models and strongly-typed identifiers.
//!
//! Defines the three managed resources (services, mailing lists, members),
//! newtype ID wrappers for compile-time type safety, and the cross-field
//! business rules each resource type must satisfy at creation time.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Opaque optimistic-concurrency token.
///
/// Returned by the store on every write and monotonically increasing across
/// the whole store. The sole concurrency-control primitive: conditional
/// writes compare the caller's expected revision against the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Revision(pub u64);

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Revision {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub Uuid);

        impl $name {
            /// Creates a new random identifier.
            ///
            /// UIDs are generated server-side at creation and never accepted
            /// from the caller.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl std::str::FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|_| Error::validation(format!("invalid uid: {s}")))
            }
        }
    };
}

entity_id! {
    /// Strongly-typed service identifier.
    ServiceId
}

entity_id! {
    /// Strongly-typed mailing-list identifier.
    MailingListId
}

entity_id! {
    /// Strongly-typed member identifier.
    MemberId
}

/// Kind of mailing-provider service.
///
/// Determines which fields are mandatory or forbidden at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    /// The project's main service. Requires owners, forbids a prefix,
    /// and is delete-protected.
    Primary,
    /// A formation-stage service. Requires a prefix.
    Formation,
    /// A service shared with an existing provider group. Requires a prefix
    /// and a positive provider group id, forbids owners.
    Shared,
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Formation => write!(f, "formation"),
            Self::Shared => write!(f, "shared"),
        }
    }
}

/// Mailing-provider account/group record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    /// Unique identifier, generated server-side.
    pub uid: ServiceId,

    /// Service kind; immutable after creation.
    pub service_type: ServiceType,

    /// Project this service belongs to; immutable after creation.
    pub project_uid: String,

    /// Denormalized project name.
    pub project_name: String,

    /// Provider group name, unique per tenant domain.
    pub group_name: String,

    /// Group-name prefix. Required for formation/shared, forbidden for
    /// primary.
    pub prefix: Option<String>,

    /// Owner email addresses. Required non-empty for primary, forbidden
    /// for shared.
    pub owners: Vec<String>,

    /// Provider-assigned group id once synchronized; immutable once set.
    pub group_id: Option<u64>,

    /// Tenant domain on the provider (virtual-hosting key).
    pub domain: String,

    /// When the service was created.
    pub created_at: DateTime<Utc>,

    /// When the service was last modified.
    pub updated_at: DateTime<Utc>,
}

impl Service {
    /// Whether this service has been accepted by the external provider.
    pub const fn is_synchronized(&self) -> bool {
        self.group_id.is_some()
    }

    /// Validates the type-specific mandatory/forbidden field rules.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] naming the first violated rule.
    pub fn validate(&self) -> Result<()> {
        if self.project_uid.trim().is_empty() {
            return Err(Error::validation("project_uid is required"));
        }
        if self.group_name.trim().is_empty() {
            return Err(Error::validation("group_name is required"));
        }
        if self.domain.trim().is_empty() {
            return Err(Error::validation("domain is required"));
        }

        let has_prefix = self.prefix.as_deref().is_some_and(|p| !p.trim().is_empty());

        match self.service_type {
            ServiceType::Primary => {
                if self.owners.is_empty() {
                    return Err(Error::validation(
                        "primary service requires at least one owner email",
                    ));
                }
                if has_prefix {
                    return Err(Error::validation("primary service must not set a prefix"));
                }
            },
            ServiceType::Formation => {
                if !has_prefix {
                    return Err(Error::validation("formation service requires a prefix"));
                }
            },
            ServiceType::Shared => {
                if !has_prefix {
                    return Err(Error::validation("shared service requires a prefix"));
                }
                if !self.group_id.is_some_and(|id| id > 0) {
                    return Err(Error::validation(
                        "shared service requires a positive provider group id",
                    ));
                }
                if !self.owners.is_empty() {
                    return Err(Error::validation("shared service must not set owner emails"));
                }
            },
        }

        Ok(())
    }
}

/// Kind of mailing list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailingListType {
    /// One-way announcement list.
    Announcement,
    /// Two-way discussion list.
    Discussion,
    /// Provider-specific custom configuration.
    Custom,
}

impl fmt::Display for MailingListType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Announcement => write!(f, "announcement"),
            Self::Discussion => write!(f, "discussion"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

/// Mailing list belonging to exactly one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailingList {
    /// Unique identifier, generated server-side.
    pub uid: MailingListId,

    /// Parent service; immutable after creation.
    pub service_uid: ServiceId,

    /// Group name, unique within the parent service.
    pub group_name: String,

    /// Human-readable title.
    pub title: String,

    /// Free-form description.
    pub description: String,

    /// List kind.
    pub list_type: MailingListType,

    /// Whether the archive and membership are publicly visible.
    pub public: bool,

    /// Optional associated committee uid.
    pub committee_uid: Option<String>,

    /// Denormalized committee name.
    pub committee_name: Option<String>,

    /// Denormalized from the parent service at creation.
    pub project_uid: String,

    /// Denormalized from the parent service at creation.
    pub project_name: String,

    /// Provider-assigned subgroup id once synchronized; immutable once set.
    pub subgroup_id: Option<u64>,

    /// When the list was created.
    pub created_at: DateTime<Utc>,

    /// When the list was last modified.
    pub updated_at: DateTime<Utc>,
}

impl MailingList {
    /// Whether this list is its parent service's main group.
    ///
    /// The main group mirrors the service itself on the provider side and
    /// carries extra invariants: it must stay public, must stay
    /// announcement-type, and cannot be deleted while the parent exists.
    pub fn is_main_group(&self, parent: &Service) -> bool {
        self.group_name == parent.group_name
    }

    /// Whether this list has been accepted by the external provider.
    pub const fn is_synchronized(&self) -> bool {
        self.subgroup_id.is_some()
    }

    /// Validates shape and main-group rules against the parent service.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] naming the first violated rule.
    pub fn validate(&self, parent: &Service) -> Result<()> {
        if self.group_name.trim().is_empty() {
            return Err(Error::validation("group_name is required"));
        }
        if self.service_uid != parent.uid {
            return Err(Error::validation("mailing list does not belong to the given service"));
        }
        if self.is_main_group(parent) {
            if !self.public {
                return Err(Error::validation("main group must be public"));
            }
            if self.list_type != MailingListType::Announcement {
                return Err(Error::validation("main group must be an announcement list"));
            }
        }
        Ok(())
    }
}

/// Mail delivery preference for a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Every message delivered individually.
    #[default]
    Individual,
    /// Periodic digest.
    Digest,
    /// Subscribed but receiving nothing.
    None,
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Individual => write!(f, "individual"),
            Self::Digest => write!(f, "digest"),
            Self::None => write!(f, "none"),
        }
    }
}

/// Moderation standing of a member within its list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModStatus {
    /// Ordinary member.
    #[default]
    Member,
    /// Can moderate pending messages.
    Moderator,
    /// Full owner of the list on the provider side.
    Owner,
}

impl fmt::Display for ModStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Member => write!(f, "member"),
            Self::Moderator => write!(f, "moderator"),
            Self::Owner => write!(f, "owner"),
        }
    }
}

/// Subscription of one email address to one mailing list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    /// Unique identifier, generated server-side.
    pub uid: MemberId,

    /// Parent mailing list; immutable after creation.
    pub mailing_list_uid: MailingListId,

    /// Subscription email. Immutable and unique within the list.
    pub email: String,

    /// Given name.
    pub first_name: String,

    /// Family name.
    pub last_name: String,

    /// Affiliation, if supplied.
    pub organization: Option<String>,

    /// Job title, if supplied.
    pub job_title: Option<String>,

    /// Delivery preference.
    pub delivery_mode: DeliveryMode,

    /// Moderation standing.
    pub mod_status: ModStatus,

    /// Provider-assigned member id once synchronized; immutable once set.
    pub member_id: Option<u64>,

    /// When the member was created.
    pub created_at: DateTime<Utc>,

    /// When the member was last modified.
    pub updated_at: DateTime<Utc>,
}

impl Member {
    /// Email normalized for uniqueness comparison.
    pub fn normalized_email(&self) -> String {
        normalize_email(&self.email)
    }

    /// Whether this member has been accepted by the external provider.
    pub const fn is_synchronized(&self) -> bool {
        self.member_id.is_some()
    }

    /// Validates the request-shape rules for a member record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] naming the first violated rule.
    pub fn validate(&self) -> Result<()> {
        let email = self.email.trim();
        if email.is_empty() {
            return Err(Error::validation("email is required"));
        }
        // Field-level format rules live at the API layer; this guards the
        // constraint-key derivation only.
        if !email.contains('@') {
            return Err(Error::validation(format!("invalid email address: {email}")));
        }
        Ok(())
    }
}

/// Normalizes an email address for constraint-key derivation.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}
