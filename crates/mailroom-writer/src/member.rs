//! Write orchestration for mailing-list members.
//!
//! A member is one email's subscription to one list, unique per list on
//! the normalized address. Provider subscriptions exist only when the
//! parent list is itself synchronized; provider updates and removals are
//! best-effort so a provider outage never blocks local bookkeeping.

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use mailroom_core::{
    backoff::retry,
    storage::{constraint::member_constraint_key, put_json, put_json_with_revision, MEMBERS_BUCKET},
    DeliveryMode, Error, MailingList, Member, MemberId, ModStatus, Result, Revision,
};

use crate::{
    context::{check_immutable, WriterContext},
    etag::parse_etag,
    publisher::{dispatch, ChangeAction, ChangeMessage, ChangeTarget},
    rollback::Rollback,
};

/// Caller-supplied fields for a new member.
#[derive(Debug, Clone)]
pub struct NewMember {
    /// Parent mailing list.
    pub mailing_list_uid: mailroom_core::MailingListId,
    /// Subscription email.
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
}

/// Partial update for a member. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct MemberUpdate {
    /// Immutable; echo only.
    pub email: Option<String>,
    /// Mutable.
    pub first_name: Option<String>,
    /// Mutable.
    pub last_name: Option<String>,
    /// Mutable.
    pub organization: Option<String>,
    /// Mutable.
    pub job_title: Option<String>,
    /// Mutable.
    pub delivery_mode: Option<DeliveryMode>,
    /// Mutable.
    pub mod_status: Option<ModStatus>,
}

/// Orchestrates member writes.
#[derive(Clone)]
pub struct MemberWriter {
    ctx: WriterContext,
}

impl MemberWriter {
    /// Creates a writer over the shared context.
    pub fn new(ctx: WriterContext) -> Self {
        Self { ctx }
    }

    /// Subscribes a member to an existing list.
    ///
    /// Saga order: resolve the parent list, validate, reserve the
    /// `(list, email)` constraint, subscribe on the provider when the
    /// list is synchronized, persist, index, notify.
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing list, `Conflict` when the address is
    /// already subscribed, `Validation` for a malformed request.
    #[instrument(skip_all, fields(mailing_list_uid = %new.mailing_list_uid))]
    pub async fn create(
        &self,
        new: NewMember,
        cancel: &CancellationToken,
    ) -> Result<(Member, Revision)> {
        let (list, _) = self.ctx.fetch_mailing_list(new.mailing_list_uid).await?;
        let member = self.build_member(new);
        member.validate()?;

        let provider_sync = self.ctx.config.sync_enabled && list.is_synchronized();
        self.persist_new(member, &list, provider_sync, cancel).await
    }

    /// Records a subscription the provider created on its side.
    ///
    /// Driven by webhook events: the provider member id is already known
    /// and no provider call is made.
    ///
    /// # Errors
    ///
    /// Same as [`create`](Self::create), minus provider faults.
    #[instrument(skip_all, fields(mailing_list_uid = %new.mailing_list_uid, member_id))]
    pub async fn create_for_provider(
        &self,
        new: NewMember,
        member_id: u64,
        cancel: &CancellationToken,
    ) -> Result<(Member, Revision)> {
        let (list, _) = self.ctx.fetch_mailing_list(new.mailing_list_uid).await?;
        let mut member = self.build_member(new);
        member.member_id = Some(member_id);
        member.validate()?;

        self.persist_new(member, &list, false, cancel).await
    }

    /// Updates a member's mutable fields and pushes them to the provider
    /// best-effort.
    ///
    /// # Errors
    ///
    /// `Conflict` for a stale ETag, `Validation` when the email differs
    /// from the stored one.
    #[instrument(skip_all, fields(uid = %uid))]
    pub async fn update(
        &self,
        uid: MemberId,
        etag: &str,
        update: MemberUpdate,
    ) -> Result<(Member, Revision)> {
        let expected = parse_etag(etag)?;
        let (mut member, current) = self.ctx.fetch_member(uid).await?;
        if expected != current {
            return Err(Error::conflict(format!(
                "member {uid} was modified by another process"
            )));
        }

        check_immutable("email", &member.email, update.email.as_ref())?;

        if let Some(first_name) = update.first_name {
            member.first_name = first_name;
        }
        if let Some(last_name) = update.last_name {
            member.last_name = last_name;
        }
        if let Some(organization) = update.organization {
            member.organization = Some(organization);
        }
        if let Some(job_title) = update.job_title {
            member.job_title = Some(job_title);
        }
        if let Some(delivery_mode) = update.delivery_mode {
            member.delivery_mode = delivery_mode;
        }
        if let Some(mod_status) = update.mod_status {
            member.mod_status = mod_status;
        }
        member.updated_at = self.ctx.clock.now();

        let revision = put_json_with_revision(
            self.ctx.store.as_ref(),
            MEMBERS_BUCKET,
            &uid.to_string(),
            &member,
            expected,
        )
        .await
        .map_err(|err| err.context("update member"))?;

        if self.ctx.config.sync_enabled {
            if let Some(member_id) = member.member_id {
                if let Err(err) = self.push_to_provider(&member, member_id).await {
                    warn!(member_id, error = %err, "provider member update failed, continuing");
                }
            }
        }

        dispatch(&self.ctx.publisher, vec![change_message(ChangeAction::Updated, &member)]);
        Ok((member, revision))
    }

    /// Unsubscribes a member.
    ///
    /// Provider removal is best-effort; the local record, index and
    /// constraint always come down together.
    ///
    /// # Errors
    ///
    /// `Conflict` for a stale ETag, `NotFound` for an unknown member.
    #[instrument(skip_all, fields(uid = %uid))]
    pub async fn delete(&self, uid: MemberId, etag: &str) -> Result<()> {
        let expected = parse_etag(etag)?;
        let (member, _) = self.ctx.fetch_member(uid).await?;

        if self.ctx.config.sync_enabled {
            if let Some(member_id) = member.member_id {
                match self.provider_domain(&member).await {
                    Ok(domain) => {
                        if let Err(err) = self.ctx.provider.remove_member(&domain, member_id).await
                        {
                            warn!(member_id, error = %err, "provider member removal failed, continuing");
                        }
                    },
                    Err(err) => {
                        warn!(member_id, error = %err, "provider domain unresolved, skipping removal");
                    },
                }
            }
        }

        self.remove_record(&member, expected).await?;

        info!(uid = %uid, "member deleted");
        dispatch(&self.ctx.publisher, vec![change_message(ChangeAction::Deleted, &member)]);
        Ok(())
    }

    /// Removes a member the provider already unsubscribed on its side.
    ///
    /// Driven by webhook events; no provider call.
    ///
    /// # Errors
    ///
    /// `NotFound` when the member is already gone, `Conflict` on a write
    /// race.
    #[instrument(skip_all, fields(uid = %uid))]
    pub async fn delete_for_provider(&self, uid: MemberId) -> Result<()> {
        let (member, current) = self.ctx.fetch_member(uid).await?;
        self.remove_record(&member, current).await?;

        info!(uid = %uid, "member removed after provider unsubscribe");
        dispatch(&self.ctx.publisher, vec![change_message(ChangeAction::Deleted, &member)]);
        Ok(())
    }

    fn build_member(&self, new: NewMember) -> Member {
        let now = self.ctx.clock.now();
        Member {
            uid: MemberId::new(),
            mailing_list_uid: new.mailing_list_uid,
            email: new.email,
            first_name: new.first_name,
            last_name: new.last_name,
            organization: new.organization,
            job_title: new.job_title,
            delivery_mode: new.delivery_mode,
            mod_status: new.mod_status,
            member_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Shared tail of both create paths: constraint, optional provider
    /// subscription, record, index, notification.
    async fn persist_new(
        &self,
        mut member: Member,
        list: &MailingList,
        provider_sync: bool,
        cancel: &CancellationToken,
    ) -> Result<(Member, Revision)> {
        let uid = member.uid.to_string();
        let mut rollback = Rollback::new("create member");

        let constraint = member_constraint_key(list.uid, &member.email);
        if let Err(err) = retry(&self.ctx.config.retry, cancel, || {
            self.ctx.constraints.reserve(&constraint, &uid)
        })
        .await
        {
            return Err(err.context("create member"));
        }
        rollback.push("release constraint", {
            let constraints = self.ctx.constraints.clone();
            let key = constraint.clone();
            let uid = uid.clone();
            move || async move { constraints.release(&key, &uid).await }
        });

        if provider_sync {
            if let Some(subgroup_id) = list.subgroup_id {
                let (parent, _) = match self.ctx.fetch_service(list.service_uid).await {
                    Ok(found) => found,
                    Err(err) => return rollback.abort(err).await,
                };
                let member_id = match retry(&self.ctx.config.retry, cancel, || {
                    self.ctx.provider.add_member(&parent.domain, subgroup_id, &member)
                })
                .await
                {
                    Ok(id) => id,
                    Err(err) => return rollback.abort(err).await,
                };
                member.member_id = Some(member_id);
                rollback.push("remove provider member", {
                    let provider = self.ctx.provider.clone();
                    let domain = parent.domain.clone();
                    move || async move {
                        if let Err(err) = provider.remove_member(&domain, member_id).await {
                            warn!(member_id, error = %err, "provider subscription left behind");
                        }
                    }
                });
            }
        }

        let revision = match put_json(self.ctx.store.as_ref(), MEMBERS_BUCKET, &uid, &member).await
        {
            Ok(revision) => revision,
            Err(err) => return rollback.abort(err).await,
        };
        rollback.push("delete member record", {
            let store = self.ctx.store.clone();
            let uid = uid.clone();
            move || async move {
                if let Err(err) = store.delete(MEMBERS_BUCKET, &uid, revision).await {
                    warn!(uid, error = %err, "member record left behind");
                }
            }
        });

        if let Err(failure) = self.ctx.indices.create_indices(&member).await {
            for key in &failure.created {
                self.ctx.indices.delete_key(key).await;
            }
            return rollback.abort(failure.source).await;
        }

        info!(uid, member_id = member.member_id, "member created");
        dispatch(&self.ctx.publisher, vec![change_message(ChangeAction::Created, &member)]);
        Ok((member, revision))
    }

    async fn push_to_provider(&self, member: &Member, member_id: u64) -> Result<()> {
        let domain = self.provider_domain(member).await?;
        self.ctx.provider.update_member(&domain, member_id, member).await
    }

    /// Resolves the tenant domain through the member's list and service.
    async fn provider_domain(&self, member: &Member) -> Result<String> {
        let (list, _) = self.ctx.fetch_mailing_list(member.mailing_list_uid).await?;
        let (service, _) = self.ctx.fetch_service(list.service_uid).await?;
        Ok(service.domain)
    }

    /// Deletes the record at `expected`, then tears down the index and
    /// uniqueness constraint.
    async fn remove_record(&self, member: &Member, expected: Revision) -> Result<()> {
        let uid = member.uid.to_string();
        self.ctx
            .store
            .delete(MEMBERS_BUCKET, &uid, expected)
            .await
            .map_err(|err| err.context("delete member"))?;

        self.ctx.indices.delete_indices(member).await;
        let constraint = member_constraint_key(member.mailing_list_uid, &member.email);
        self.ctx.constraints.release(&constraint, &uid).await;
        Ok(())
    }
}

/// Members feed the search indexer only; subscriptions carry no
/// permission data.
fn change_message(action: ChangeAction, member: &Member) -> ChangeMessage {
    let body = if action == ChangeAction::Deleted {
        serde_json::json!({})
    } else {
        serde_json::to_value(member).unwrap_or_default()
    };
    ChangeMessage {
        target: ChangeTarget::Indexer,
        action,
        resource: "members",
        uid: member.uid.to_string(),
        body,
    }
}
