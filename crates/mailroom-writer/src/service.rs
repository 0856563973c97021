//! Write orchestration for services.
//!
//! A service is the root resource: it owns the provider group, the main
//! mailing list mirrors it, and its type decides which fields are required
//! and whether it may ever be deleted. Creation is a compensating-action
//! saga; updates are guarded by the caller's ETag; deletion enforces the
//! type-specific protections before touching anything.

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use mailroom_core::{
    backoff::retry,
    storage::{
        constraint::service_constraint_key, put_json, put_json_with_revision, SERVICES_BUCKET,
    },
    Error, Result, Revision, Service, ServiceId, ServiceType,
};

use crate::{
    context::{check_immutable, WriterContext},
    etag::parse_etag,
    publisher::{dispatch, ChangeAction, ChangeMessage, ChangeTarget},
    rollback::Rollback,
};

/// Caller-supplied fields for a new service.
#[derive(Debug, Clone)]
pub struct NewService {
    /// Service kind.
    pub service_type: ServiceType,
    /// Owning project.
    pub project_uid: String,
    /// Denormalized project name.
    pub project_name: String,
    /// Provider group name.
    pub group_name: String,
    /// Group-name prefix, for formation and shared services.
    pub prefix: Option<String>,
    /// Owner emails, for primary services.
    pub owners: Vec<String>,
    /// Existing provider group id. Only meaningful for shared services;
    /// ignored otherwise (the provider assigns ids for groups we create).
    pub group_id: Option<u64>,
    /// Tenant domain on the provider.
    pub domain: String,
}

/// Partial update for a service. `None` fields are left untouched.
///
/// Immutable fields may be echoed back unchanged; echoing a different
/// value is a validation error.
#[derive(Debug, Clone, Default)]
pub struct ServiceUpdate {
    /// Immutable; echo only.
    pub service_type: Option<ServiceType>,
    /// Immutable; echo only.
    pub project_uid: Option<String>,
    /// Mutable.
    pub project_name: Option<String>,
    /// Immutable; echo only.
    pub group_name: Option<String>,
    /// Immutable; echo only.
    pub prefix: Option<String>,
    /// Mutable.
    pub owners: Option<Vec<String>>,
    /// Immutable once set; echo only.
    pub group_id: Option<u64>,
    /// Immutable; echo only.
    pub domain: Option<String>,
}

/// Orchestrates service writes.
#[derive(Clone)]
pub struct ServiceWriter {
    ctx: WriterContext,
}

impl ServiceWriter {
    /// Creates a writer over the shared context.
    pub fn new(ctx: WriterContext) -> Self {
        Self { ctx }
    }

    /// Creates a service.
    ///
    /// Saga order: validate, reserve the `(project, type)` constraint,
    /// create the provider group (non-shared services, when sync is
    /// enabled), persist the record, write indices, notify downstream.
    /// Any failure after the first side effect rolls back everything
    /// created so far.
    ///
    /// # Errors
    ///
    /// `Validation` for shape violations, `Conflict` when the project
    /// already has a service of this type, or whatever fault aborted the
    /// saga after rollback.
    #[instrument(skip_all, fields(project_uid = %new.project_uid, service_type = %new.service_type))]
    pub async fn create(
        &self,
        new: NewService,
        cancel: &CancellationToken,
    ) -> Result<(Service, Revision)> {
        let now = self.ctx.clock.now();
        let mut service = Service {
            uid: ServiceId::new(),
            service_type: new.service_type,
            project_uid: new.project_uid,
            project_name: new.project_name,
            group_name: new.group_name,
            prefix: new.prefix,
            owners: new.owners,
            group_id: if new.service_type == ServiceType::Shared { new.group_id } else { None },
            domain: new.domain,
            created_at: now,
            updated_at: now,
        };
        service.validate()?;

        let uid = service.uid.to_string();
        let mut rollback = Rollback::new("create service");

        let constraint = service_constraint_key(&service.project_uid, service.service_type);
        if let Err(err) = retry(&self.ctx.config.retry, cancel, || {
            self.ctx.constraints.reserve(&constraint, &uid)
        })
        .await
        {
            return Err(err.context("create service"));
        }
        rollback.push("release constraint", {
            let constraints = self.ctx.constraints.clone();
            let key = constraint.clone();
            let uid = uid.clone();
            move || async move { constraints.release(&key, &uid).await }
        });

        // A shared service reuses a group someone else administers; only
        // primary/formation services get a fresh provider group.
        if self.ctx.config.sync_enabled && service.service_type != ServiceType::Shared {
            let group_id = match retry(&self.ctx.config.retry, cancel, || {
                self.ctx.provider.create_group(&service.domain, &service)
            })
            .await
            {
                Ok(id) => id,
                Err(err) => return rollback.abort(err).await,
            };
            service.group_id = Some(group_id);
            rollback.push("delete provider group", {
                let provider = self.ctx.provider.clone();
                let domain = service.domain.clone();
                move || async move {
                    if let Err(err) = provider.delete_group(&domain, group_id).await {
                        warn!(group_id, error = %err, "provider group left behind");
                    }
                }
            });
        }

        let revision =
            match put_json(self.ctx.store.as_ref(), SERVICES_BUCKET, &uid, &service).await {
                Ok(revision) => revision,
                Err(err) => return rollback.abort(err).await,
            };
        rollback.push("delete service record", {
            let store = self.ctx.store.clone();
            let uid = uid.clone();
            move || async move {
                if let Err(err) = store.delete(SERVICES_BUCKET, &uid, revision).await {
                    warn!(uid, error = %err, "service record left behind");
                }
            }
        });

        if let Err(failure) = self.ctx.indices.create_indices(&service).await {
            for key in &failure.created {
                self.ctx.indices.delete_key(key).await;
            }
            return rollback.abort(failure.source).await;
        }

        info!(uid, group_id = service.group_id, "service created");
        dispatch(&self.ctx.publisher, change_messages(ChangeAction::Created, &service));
        Ok((service, revision))
    }

    /// Updates a service's mutable fields (`project_name`, `owners`).
    ///
    /// # Errors
    ///
    /// `Conflict` when the ETag no longer matches the stored revision,
    /// `Validation` when an immutable field differs from the stored value.
    #[instrument(skip_all, fields(uid = %uid))]
    pub async fn update(
        &self,
        uid: ServiceId,
        etag: &str,
        update: ServiceUpdate,
    ) -> Result<(Service, Revision)> {
        let expected = parse_etag(etag)?;
        let (mut service, current) = self.ctx.fetch_service(uid).await?;
        if expected != current {
            return Err(Error::conflict(format!(
                "service {uid} was modified by another process"
            )));
        }

        check_immutable("service_type", &service.service_type, update.service_type.as_ref())?;
        check_immutable("project_uid", &service.project_uid, update.project_uid.as_ref())?;
        check_immutable("group_name", &service.group_name, update.group_name.as_ref())?;
        check_immutable("domain", &service.domain, update.domain.as_ref())?;
        if update.prefix.is_some() && update.prefix != service.prefix {
            return Err(Error::validation(format!(
                "prefix is immutable: stored {}, requested {}",
                service.prefix.as_deref().unwrap_or("<unset>"),
                update.prefix.as_deref().unwrap_or("<unset>"),
            )));
        }
        if update.group_id.is_some() && update.group_id != service.group_id {
            return Err(Error::validation(format!(
                "group_id is immutable: stored {:?}, requested {:?}",
                service.group_id, update.group_id,
            )));
        }

        if let Some(project_name) = update.project_name {
            service.project_name = project_name;
        }
        if let Some(owners) = update.owners {
            service.owners = owners;
        }
        service.validate()?;
        service.updated_at = self.ctx.clock.now();

        let revision = put_json_with_revision(
            self.ctx.store.as_ref(),
            SERVICES_BUCKET,
            &uid.to_string(),
            &service,
            expected,
        )
        .await
        .map_err(|err| err.context("update service"))?;

        dispatch(&self.ctx.publisher, change_messages(ChangeAction::Updated, &service));
        Ok((service, revision))
    }

    /// Deletes a service.
    ///
    /// Primary services are permanently delete-protected. The provider
    /// group is removed best-effort first (never for shared services,
    /// whose group predates us), then the record, indices and constraint.
    ///
    /// # Errors
    ///
    /// `Validation` for a protected service, `Conflict` when the ETag is
    /// stale.
    #[instrument(skip_all, fields(uid = %uid))]
    pub async fn delete(&self, uid: ServiceId, etag: &str) -> Result<()> {
        let expected = parse_etag(etag)?;
        let (service, _) = self.ctx.fetch_service(uid).await?;

        if service.service_type == ServiceType::Primary {
            return Err(Error::validation("primary service cannot be deleted"));
        }

        if self.ctx.config.sync_enabled && service.service_type != ServiceType::Shared {
            if let Some(group_id) = service.group_id {
                if let Err(err) = self.ctx.provider.delete_group(&service.domain, group_id).await {
                    warn!(group_id, error = %err, "provider group removal failed, continuing");
                }
            }
        }

        self.ctx
            .store
            .delete(SERVICES_BUCKET, &uid.to_string(), expected)
            .await
            .map_err(|err| err.context("delete service"))?;

        self.ctx.indices.delete_indices(&service).await;
        let constraint = service_constraint_key(&service.project_uid, service.service_type);
        self.ctx.constraints.release(&constraint, &uid.to_string()).await;

        info!(uid = %uid, "service deleted");
        dispatch(&self.ctx.publisher, change_messages(ChangeAction::Deleted, &service));
        Ok(())
    }
}

/// Indexer and access-control messages for a service change.
///
/// Services carry owner permissions, so both consumers hear about every
/// change.
fn change_messages(action: ChangeAction, service: &Service) -> Vec<ChangeMessage> {
    let body = if action == ChangeAction::Deleted {
        serde_json::json!({})
    } else {
        serde_json::to_value(service).unwrap_or_default()
    };
    vec![
        ChangeMessage {
            target: ChangeTarget::Indexer,
            action,
            resource: "services",
            uid: service.uid.to_string(),
            body: body.clone(),
        },
        ChangeMessage {
            target: ChangeTarget::AccessControl,
            action,
            resource: "services",
            uid: service.uid.to_string(),
            body,
        },
    ]
}
