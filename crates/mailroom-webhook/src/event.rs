//! Typed decoding of provider webhook payloads.
//!
//! Payloads are decoded defensively: only the fields the pipeline uses
//! are read, unknown fields are ignored, and an action outside the
//! supported set is a validation failure so the provider stops
//! redelivering it.

use serde::Deserialize;

use mailroom_core::{Error, Result};

/// Actions the pipeline processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookAction {
    /// A subgroup was created on the provider side.
    SubGroupCreated,
    /// A subgroup was deleted on the provider side.
    SubGroupDeleted,
    /// A member joined a subgroup.
    SubMemberAdded,
    /// A member left or was removed from a subgroup.
    SubMemberRemoved,
    /// A member was banned from a subgroup. Treated as a removal.
    SubMemberBanned,
}

/// The provider group an event refers to.
#[derive(Debug, Clone, Deserialize)]
pub struct EventGroup {
    /// Provider group id.
    pub id: u64,
    /// Group name, the tenant lookup key.
    pub name: String,
}

/// Member details carried by membership events.
#[derive(Debug, Clone, Deserialize)]
pub struct EventMemberInfo {
    /// Provider member id.
    pub id: u64,
    /// Subscription email.
    pub email: String,
    /// Display name, free-form.
    #[serde(default)]
    pub full_name: String,
}

/// One decoded webhook event.
///
/// Field usage by action: `group` names the parent group on every event,
/// `extra` carries the subgroup name, `extra_id` the subgroup id on
/// creation events, and `member_info` the member on membership events.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    /// Raw action string; see [`WebhookEvent::action`].
    pub action: String,

    /// Parent group the event happened under.
    #[serde(default)]
    pub group: Option<EventGroup>,

    /// Member details, on membership events.
    #[serde(default)]
    pub member_info: Option<EventMemberInfo>,

    /// Action-dependent string payload (subgroup name).
    #[serde(default)]
    pub extra: Option<String>,

    /// Action-dependent numeric payload (subgroup id).
    #[serde(default)]
    pub extra_id: Option<u64>,
}

impl WebhookEvent {
    /// Maps the raw action string onto the supported set.
    ///
    /// # Errors
    ///
    /// `Validation` for any action outside it, which suppresses
    /// redelivery.
    pub fn action(&self) -> Result<WebhookAction> {
        match self.action.as_str() {
            "sub_group_created" => Ok(WebhookAction::SubGroupCreated),
            "sub_group_deleted" => Ok(WebhookAction::SubGroupDeleted),
            "sub_member_added" => Ok(WebhookAction::SubMemberAdded),
            "sub_member_removed" => Ok(WebhookAction::SubMemberRemoved),
            "sub_member_banned" => Ok(WebhookAction::SubMemberBanned),
            other => Err(Error::validation(format!("unsupported webhook action: {other}"))),
        }
    }

    /// The parent group, which every supported action must carry.
    ///
    /// # Errors
    ///
    /// `Validation` when absent.
    pub fn require_group(&self) -> Result<&EventGroup> {
        self.group
            .as_ref()
            .ok_or_else(|| Error::validation(format!("{} event without group", self.action)))
    }

    /// The subgroup name from `extra`.
    ///
    /// # Errors
    ///
    /// `Validation` when absent or empty.
    pub fn require_subgroup_name(&self) -> Result<&str> {
        self.extra
            .as_deref()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| Error::validation(format!("{} event without subgroup name", self.action)))
    }

    /// The member details from `member_info`.
    ///
    /// # Errors
    ///
    /// `Validation` when absent.
    pub fn require_member(&self) -> Result<&EventMemberInfo> {
        self.member_info
            .as_ref()
            .ok_or_else(|| Error::validation(format!("{} event without member_info", self.action)))
    }
}

/// Decodes a raw body into an event.
///
/// # Errors
///
/// `Validation` for anything that is not a JSON object of the expected
/// shape.
pub fn decode_event(body: &[u8]) -> Result<WebhookEvent> {
    serde_json::from_slice(body)
        .map_err(|err| Error::validation(format!("malformed webhook payload: {err}")))
}
