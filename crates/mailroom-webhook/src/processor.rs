//! Applies verified webhook events to local state.
//!
//! Events identify resources by provider group name, not UID, so the
//! processor resolves through the group-name lookup and the uniqueness
//! constraints before driving the writers' provider-event entry points.
//! Every outcome is classified once: validation failures mean the event
//! can never apply and redelivery is pointless; anything else asks the
//! provider to redeliver.

use std::str::FromStr;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use mailroom_core::{
    backoff::retry,
    storage::{
        constraint::{mailing_list_constraint_key, member_constraint_key},
        index::group_name_lookup_key,
    },
    DeliveryMode, Error, ErrorKind, MailingListId, MemberId, ModStatus, Result, Service, ServiceId,
};
use mailroom_writer::{MailingListWriter, MemberWriter, NewMember, WriterContext};

use crate::event::{EventMemberInfo, WebhookAction, WebhookEvent};

/// Drives writers from decoded webhook events.
pub struct WebhookProcessor {
    ctx: WriterContext,
    lists: MailingListWriter,
    members: MemberWriter,
    cancel: CancellationToken,
}

impl WebhookProcessor {
    /// Creates a processor over the shared writer context. The token
    /// aborts retry waits at shutdown.
    pub fn new(ctx: WriterContext, cancel: CancellationToken) -> Self {
        Self {
            lists: MailingListWriter::new(ctx.clone()),
            members: MemberWriter::new(ctx.clone()),
            ctx,
            cancel,
        }
    }

    /// Applies one event.
    ///
    /// # Errors
    ///
    /// `Validation` when the event can never apply (unknown action,
    /// unknown group, missing fields); transient faults surface so the
    /// caller can request redelivery.
    #[instrument(skip_all, fields(action = %event.action))]
    pub async fn process(&self, event: &WebhookEvent) -> Result<()> {
        match event.action()? {
            WebhookAction::SubGroupCreated => self.subgroup_created(event).await,
            WebhookAction::SubGroupDeleted => self.subgroup_deleted(event).await,
            WebhookAction::SubMemberAdded => self.member_added(event).await,
            WebhookAction::SubMemberRemoved | WebhookAction::SubMemberBanned => {
                self.member_removed(event).await
            },
        }
    }

    /// Records the provider-assigned subgroup id on the matching list.
    async fn subgroup_created(&self, event: &WebhookEvent) -> Result<()> {
        let service = self.resolve_service(event).await?;
        let subgroup_name = event.require_subgroup_name()?;
        let subgroup_id = event
            .extra_id
            .ok_or_else(|| Error::validation("sub_group_created event without subgroup id"))?;

        let list_uid = self.resolve_list(&service, subgroup_name).await?;
        retry(&self.ctx.config.retry, &self.cancel, || {
            self.lists.record_provider_subgroup(list_uid, subgroup_id)
        })
        .await?;

        info!(%list_uid, subgroup_id, "subgroup id recorded from webhook");
        Ok(())
    }

    /// Removes the local list mirroring a provider-deleted subgroup.
    async fn subgroup_deleted(&self, event: &WebhookEvent) -> Result<()> {
        let service = self.resolve_service(event).await?;
        let subgroup_name = event.require_subgroup_name()?;

        let list_uid = self.resolve_list(&service, subgroup_name).await?;
        retry(&self.ctx.config.retry, &self.cancel, || self.lists.delete_for_provider(list_uid))
            .await?;

        info!(%list_uid, "mailing list removed from webhook");
        Ok(())
    }

    /// Mirrors a provider-side subscription.
    ///
    /// Redeliveries and subscriptions that already exist locally are
    /// acknowledged without writing.
    async fn member_added(&self, event: &WebhookEvent) -> Result<()> {
        let service = self.resolve_service(event).await?;
        let subgroup_name = event.require_subgroup_name()?;
        let member = event.require_member()?;

        let list_uid = self.resolve_list(&service, subgroup_name).await?;
        let constraint = member_constraint_key(list_uid, &member.email);
        if self.ctx.constraints.resolve_owner(&constraint).await.is_ok() {
            info!(%list_uid, "member already mirrored, acknowledging");
            return Ok(());
        }

        let request = new_member_from_event(list_uid, member);
        retry(&self.ctx.config.retry, &self.cancel, || {
            self.members.create_for_provider(request.clone(), member.id, &self.cancel)
        })
        .await?;

        info!(%list_uid, member_id = member.id, "member mirrored from webhook");
        Ok(())
    }

    /// Removes the local member mirroring a provider-side unsubscribe or
    /// ban. Already-gone members are acknowledged.
    async fn member_removed(&self, event: &WebhookEvent) -> Result<()> {
        let service = self.resolve_service(event).await?;
        let subgroup_name = event.require_subgroup_name()?;
        let member = event.require_member()?;

        let list_uid = self.resolve_list(&service, subgroup_name).await?;
        let constraint = member_constraint_key(list_uid, &member.email);
        let member_uid = match self.ctx.constraints.resolve_owner(&constraint).await {
            Ok(uid) => MemberId::from_str(&uid)?,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(%list_uid, "member already absent, acknowledging");
                return Ok(());
            },
            Err(err) => return Err(err),
        };

        retry(&self.ctx.config.retry, &self.cancel, || {
            self.members.delete_for_provider(member_uid)
        })
        .await?;

        info!(%list_uid, %member_uid, "member removed from webhook");
        Ok(())
    }

    /// Resolves the event's parent group name to a service.
    ///
    /// An unknown group is a validation failure: this deployment does not
    /// manage it, and redelivering will not change that.
    async fn resolve_service(&self, event: &WebhookEvent) -> Result<Service> {
        let group = event.require_group()?;
        let uid = match self.ctx.indices.resolve(&group_name_lookup_key(&group.name)).await {
            Ok(uid) => ServiceId::from_str(&uid)?,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(Error::validation(format!("unknown provider group: {}", group.name)));
            },
            Err(err) => return Err(err),
        };
        let (service, _) = self.ctx.fetch_service(uid).await?;
        Ok(service)
    }

    /// Resolves a subgroup name to its mailing-list UID within a service.
    async fn resolve_list(&self, service: &Service, subgroup_name: &str) -> Result<MailingListId> {
        let constraint = mailing_list_constraint_key(service.uid, subgroup_name);
        match self.ctx.constraints.resolve_owner(&constraint).await {
            Ok(uid) => MailingListId::from_str(&uid),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(Error::validation(format!(
                "no mailing list named {subgroup_name} under service {}",
                service.uid
            ))),
            Err(err) => Err(err),
        }
    }
}

/// Builds a local member record from event member details.
///
/// The provider only sends a display name; it is split on the first
/// space. Delivery and moderation settings start at their defaults.
fn new_member_from_event(list_uid: MailingListId, member: &EventMemberInfo) -> NewMember {
    let mut parts = member.full_name.split_whitespace();
    let first_name = parts.next().unwrap_or_default().to_string();
    let last_name = parts.collect::<Vec<_>>().join(" ");

    NewMember {
        mailing_list_uid: list_uid,
        email: member.email.clone(),
        first_name,
        last_name,
        organization: None,
        job_title: None,
        delivery_mode: DeliveryMode::Individual,
        mod_status: ModStatus::Member,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_splits_into_first_and_rest() {
        let info = EventMemberInfo {
            id: 1,
            email: "dev@aster.dev".into(),
            full_name: "Dana van der Berg".into(),
        };
        let member = new_member_from_event(MailingListId::new(), &info);
        assert_eq!(member.first_name, "Dana");
        assert_eq!(member.last_name, "van der Berg");

        let info = EventMemberInfo { id: 1, email: "dev@aster.dev".into(), full_name: String::new() };
        let member = new_member_from_event(MailingListId::new(), &info);
        assert_eq!(member.first_name, "");
        assert_eq!(member.last_name, "");
    }
}
