//! Write orchestration for mailing lists.
//!
//! Lists live under a service and inherit its project denormalization.
//! The list whose group name equals the parent's is the main group: it
//! mirrors the provider group itself, must stay public and
//! announcement-typed, and cannot be deleted while the service exists.

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use mailroom_core::{
    backoff::retry,
    storage::{
        constraint::mailing_list_constraint_key, put_json, put_json_with_revision,
        MAILING_LISTS_BUCKET,
    },
    Error, ErrorKind, MailingList, MailingListId, MailingListType, Result, Revision, ServiceId,
};

use crate::{
    context::{check_immutable, WriterContext},
    etag::parse_etag,
    publisher::{dispatch, ChangeAction, ChangeMessage, ChangeTarget},
    rollback::Rollback,
};

/// Caller-supplied fields for a new mailing list.
#[derive(Debug, Clone)]
pub struct NewMailingList {
    /// Parent service.
    pub service_uid: ServiceId,
    /// Group name, unique within the service.
    pub group_name: String,
    /// Human-readable title.
    pub title: String,
    /// Free-form description.
    pub description: String,
    /// List kind.
    pub list_type: MailingListType,
    /// Public visibility.
    pub public: bool,
    /// Associated committee, if any.
    pub committee_uid: Option<String>,
    /// Denormalized committee name.
    pub committee_name: Option<String>,
}

/// Partial update for a mailing list. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct MailingListUpdate {
    /// Immutable; echo only.
    pub service_uid: Option<ServiceId>,
    /// Immutable; echo only.
    pub group_name: Option<String>,
    /// Mutable.
    pub title: Option<String>,
    /// Mutable.
    pub description: Option<String>,
    /// Immutable; echo only.
    pub list_type: Option<MailingListType>,
    /// Mutable, except the main group must stay public.
    pub public: Option<bool>,
    /// Mutable.
    pub committee_uid: Option<String>,
    /// Mutable.
    pub committee_name: Option<String>,
}

/// Orchestrates mailing-list writes.
#[derive(Clone)]
pub struct MailingListWriter {
    ctx: WriterContext,
}

impl MailingListWriter {
    /// Creates a writer over the shared context.
    pub fn new(ctx: WriterContext) -> Self {
        Self { ctx }
    }

    /// Creates a mailing list under an existing service.
    ///
    /// Saga order: resolve the parent, validate (including main-group
    /// rules), reserve the `(service, group_name)` constraint, create the
    /// provider subgroup when the parent is synchronized, persist, index,
    /// notify. The main group never gets its own subgroup; it adopts the
    /// parent's provider group id.
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing parent, `Conflict` when the group name is
    /// taken within the service, `Validation` for shape violations.
    #[instrument(skip_all, fields(service_uid = %new.service_uid, group_name = %new.group_name))]
    pub async fn create(
        &self,
        new: NewMailingList,
        cancel: &CancellationToken,
    ) -> Result<(MailingList, Revision)> {
        let (parent, _) = self.ctx.fetch_service(new.service_uid).await?;

        let now = self.ctx.clock.now();
        let mut list = MailingList {
            uid: MailingListId::new(),
            service_uid: parent.uid,
            group_name: new.group_name,
            title: new.title,
            description: new.description,
            list_type: new.list_type,
            public: new.public,
            committee_uid: new.committee_uid,
            committee_name: new.committee_name,
            project_uid: parent.project_uid.clone(),
            project_name: parent.project_name.clone(),
            subgroup_id: None,
            created_at: now,
            updated_at: now,
        };
        list.validate(&parent)?;

        let uid = list.uid.to_string();
        let mut rollback = Rollback::new("create mailing list");

        let constraint = mailing_list_constraint_key(parent.uid, &list.group_name);
        if let Err(err) = retry(&self.ctx.config.retry, cancel, || {
            self.ctx.constraints.reserve(&constraint, &uid)
        })
        .await
        {
            return Err(err.context("create mailing list"));
        }
        rollback.push("release constraint", {
            let constraints = self.ctx.constraints.clone();
            let key = constraint.clone();
            let uid = uid.clone();
            move || async move { constraints.release(&key, &uid).await }
        });

        if self.ctx.config.sync_enabled {
            if let Some(group_id) = parent.group_id {
                if list.is_main_group(&parent) {
                    // The main group is the provider group itself.
                    list.subgroup_id = Some(group_id);
                } else {
                    let subgroup_id = match retry(&self.ctx.config.retry, cancel, || {
                        self.ctx.provider.create_subgroup(&parent.domain, group_id, &list)
                    })
                    .await
                    {
                        Ok(id) => id,
                        Err(err) => return rollback.abort(err).await,
                    };
                    list.subgroup_id = Some(subgroup_id);
                    rollback.push("delete provider subgroup", {
                        let provider = self.ctx.provider.clone();
                        let domain = parent.domain.clone();
                        move || async move {
                            if let Err(err) = provider.delete_subgroup(&domain, subgroup_id).await {
                                warn!(subgroup_id, error = %err, "provider subgroup left behind");
                            }
                        }
                    });
                }
            }
        }

        let revision =
            match put_json(self.ctx.store.as_ref(), MAILING_LISTS_BUCKET, &uid, &list).await {
                Ok(revision) => revision,
                Err(err) => return rollback.abort(err).await,
            };
        rollback.push("delete mailing list record", {
            let store = self.ctx.store.clone();
            let uid = uid.clone();
            move || async move {
                if let Err(err) = store.delete(MAILING_LISTS_BUCKET, &uid, revision).await {
                    warn!(uid, error = %err, "mailing list record left behind");
                }
            }
        });

        if let Err(failure) = self.ctx.indices.create_indices(&list).await {
            for key in &failure.created {
                self.ctx.indices.delete_key(key).await;
            }
            return rollback.abort(failure.source).await;
        }

        info!(uid, subgroup_id = list.subgroup_id, "mailing list created");
        dispatch(&self.ctx.publisher, change_messages(ChangeAction::Created, &list));
        Ok((list, revision))
    }

    /// Updates a mailing list's mutable fields.
    ///
    /// # Errors
    ///
    /// `Conflict` for a stale ETag, `Validation` for immutable-field
    /// changes or a main group losing its required shape.
    #[instrument(skip_all, fields(uid = %uid))]
    pub async fn update(
        &self,
        uid: MailingListId,
        etag: &str,
        update: MailingListUpdate,
    ) -> Result<(MailingList, Revision)> {
        let expected = parse_etag(etag)?;
        let (mut list, current) = self.ctx.fetch_mailing_list(uid).await?;
        if expected != current {
            return Err(Error::conflict(format!(
                "mailing list {uid} was modified by another process"
            )));
        }
        let (parent, _) = self.ctx.fetch_service(list.service_uid).await?;

        check_immutable("service_uid", &list.service_uid, update.service_uid.as_ref())?;
        check_immutable("group_name", &list.group_name, update.group_name.as_ref())?;
        check_immutable("list_type", &list.list_type, update.list_type.as_ref())?;

        if let Some(title) = update.title {
            list.title = title;
        }
        if let Some(description) = update.description {
            list.description = description;
        }
        if let Some(public) = update.public {
            list.public = public;
        }
        if let Some(committee_uid) = update.committee_uid {
            list.committee_uid = Some(committee_uid);
        }
        if let Some(committee_name) = update.committee_name {
            list.committee_name = Some(committee_name);
        }
        list.validate(&parent)?;
        list.updated_at = self.ctx.clock.now();

        let revision = put_json_with_revision(
            self.ctx.store.as_ref(),
            MAILING_LISTS_BUCKET,
            &uid.to_string(),
            &list,
            expected,
        )
        .await
        .map_err(|err| err.context("update mailing list"))?;

        dispatch(&self.ctx.publisher, change_messages(ChangeAction::Updated, &list));
        Ok((list, revision))
    }

    /// Deletes a mailing list.
    ///
    /// The main group is protected while its service exists; announcement
    /// lists are rejected outright because their removal needs manual
    /// provider-side handling. Provider subgroup removal is best-effort.
    ///
    /// # Errors
    ///
    /// `Validation` for a protected list, `Conflict` for a stale ETag.
    #[instrument(skip_all, fields(uid = %uid))]
    pub async fn delete(&self, uid: MailingListId, etag: &str) -> Result<()> {
        let expected = parse_etag(etag)?;
        let (list, _) = self.ctx.fetch_mailing_list(uid).await?;

        match self.ctx.fetch_service(list.service_uid).await {
            Ok((parent, _)) => {
                if list.is_main_group(&parent) {
                    return Err(Error::validation(
                        "main group cannot be deleted while its service exists",
                    ));
                }
            },
            // Orphan after a service deletion: protection no longer applies.
            Err(err) if err.kind() == ErrorKind::NotFound => {},
            Err(err) => return Err(err.context("delete mailing list")),
        }

        if list.list_type == MailingListType::Announcement {
            return Err(Error::validation(
                "announcement lists require manual provider-side handling before deletion",
            ));
        }

        if self.ctx.config.sync_enabled {
            if let Some(subgroup_id) = list.subgroup_id {
                if let Err(err) = self.remove_subgroup(&list, subgroup_id).await {
                    warn!(subgroup_id, error = %err, "provider subgroup removal failed, continuing");
                }
            }
        }

        self.remove_record(&list, expected).await?;

        info!(uid = %uid, "mailing list deleted");
        dispatch(&self.ctx.publisher, change_messages(ChangeAction::Deleted, &list));
        Ok(())
    }

    /// Records the provider-assigned subgroup id reported by a webhook.
    ///
    /// Idempotent for redeliveries of the same event.
    ///
    /// # Errors
    ///
    /// `Conflict` when a different subgroup id is already recorded (ids
    /// are immutable once set) or when a concurrent write raced this one.
    #[instrument(skip_all, fields(uid = %uid, subgroup_id))]
    pub async fn record_provider_subgroup(
        &self,
        uid: MailingListId,
        subgroup_id: u64,
    ) -> Result<()> {
        let (mut list, current) = self.ctx.fetch_mailing_list(uid).await?;

        match list.subgroup_id {
            Some(existing) if existing == subgroup_id => return Ok(()),
            Some(existing) => {
                return Err(Error::conflict(format!(
                    "mailing list {uid} already has subgroup id {existing}"
                )));
            },
            None => {},
        }

        list.subgroup_id = Some(subgroup_id);
        list.updated_at = self.ctx.clock.now();
        put_json_with_revision(
            self.ctx.store.as_ref(),
            MAILING_LISTS_BUCKET,
            &uid.to_string(),
            &list,
            current,
        )
        .await
        .map_err(|err| err.context("record subgroup id"))?;

        info!(uid = %uid, subgroup_id, "subgroup id recorded");
        Ok(())
    }

    /// Removes a list the provider already deleted on its side.
    ///
    /// Driven by webhook events; skips the delete protections and the
    /// provider call, but still tears down indices and constraint.
    ///
    /// # Errors
    ///
    /// `NotFound` when the list is already gone, `Conflict` on a write
    /// race.
    #[instrument(skip_all, fields(uid = %uid))]
    pub async fn delete_for_provider(&self, uid: MailingListId) -> Result<()> {
        let (list, current) = self.ctx.fetch_mailing_list(uid).await?;
        self.remove_record(&list, current).await?;

        info!(uid = %uid, "mailing list removed after provider deletion");
        dispatch(&self.ctx.publisher, change_messages(ChangeAction::Deleted, &list));
        Ok(())
    }

    async fn remove_subgroup(&self, list: &MailingList, subgroup_id: u64) -> Result<()> {
        let (parent, _) = self.ctx.fetch_service(list.service_uid).await?;
        self.ctx.provider.delete_subgroup(&parent.domain, subgroup_id).await
    }

    /// Deletes the record at `expected`, then tears down indices and the
    /// uniqueness constraint.
    async fn remove_record(&self, list: &MailingList, expected: Revision) -> Result<()> {
        let uid = list.uid.to_string();
        self.ctx
            .store
            .delete(MAILING_LISTS_BUCKET, &uid, expected)
            .await
            .map_err(|err| err.context("delete mailing list"))?;

        self.ctx.indices.delete_indices(list).await;
        let constraint = mailing_list_constraint_key(list.service_uid, &list.group_name);
        self.ctx.constraints.release(&constraint, &uid).await;
        Ok(())
    }
}

/// Indexer and access-control messages for a list change.
///
/// Visibility (`public`) feeds access control, so both consumers hear
/// about every change.
fn change_messages(action: ChangeAction, list: &MailingList) -> Vec<ChangeMessage> {
    let body = if action == ChangeAction::Deleted {
        serde_json::json!({})
    } else {
        serde_json::to_value(list).unwrap_or_default()
    };
    vec![
        ChangeMessage {
            target: ChangeTarget::Indexer,
            action,
            resource: "mailing-lists",
            uid: list.uid.to_string(),
            body: body.clone(),
        },
        ChangeMessage {
            target: ChangeTarget::AccessControl,
            action,
            resource: "mailing-lists",
            uid: list.uid.to_string(),
            body,
        },
    ]
}
