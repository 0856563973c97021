//! Seam between the write path and the external mailing provider.
//!
//! The orchestrator only ever needs the narrow surface below: group and
//! subgroup lifecycle plus member management, each scoped to a tenant
//! domain. The HTTP client implements this trait; tests substitute
//! recording or failing doubles.

use mailroom_core::{storage::BoxFuture, MailingList, Member, Result, Service};

/// Mutations the write path issues against the external provider.
///
/// Every method returns errors already mapped into the shared taxonomy so
/// the sagas can branch on [`kind`](mailroom_core::Error::kind) without
/// transport knowledge. Transient transport faults must surface as
/// `ServiceUnavailable`.
pub trait ProviderSync: Send + Sync + 'static {
    /// Creates the top-level group for a service, returning the
    /// provider-assigned group id.
    fn create_group<'a>(&'a self, domain: &'a str, service: &'a Service)
        -> BoxFuture<'a, Result<u64>>;

    /// Deletes a top-level group.
    fn delete_group<'a>(&'a self, domain: &'a str, group_id: u64) -> BoxFuture<'a, Result<()>>;

    /// Creates a subgroup under a synchronized group, returning the
    /// provider-assigned subgroup id.
    fn create_subgroup<'a>(
        &'a self,
        domain: &'a str,
        group_id: u64,
        list: &'a MailingList,
    ) -> BoxFuture<'a, Result<u64>>;

    /// Deletes a subgroup.
    fn delete_subgroup<'a>(&'a self, domain: &'a str, subgroup_id: u64)
        -> BoxFuture<'a, Result<()>>;

    /// Subscribes a member to a subgroup, returning the provider-assigned
    /// member id.
    fn add_member<'a>(
        &'a self,
        domain: &'a str,
        subgroup_id: u64,
        member: &'a Member,
    ) -> BoxFuture<'a, Result<u64>>;

    /// Removes a subscription.
    fn remove_member<'a>(&'a self, domain: &'a str, member_id: u64) -> BoxFuture<'a, Result<()>>;

    /// Pushes mutable member fields (delivery mode, moderation status,
    /// display name) to the provider.
    fn update_member<'a>(
        &'a self,
        domain: &'a str,
        member_id: u64,
        member: &'a Member,
    ) -> BoxFuture<'a, Result<()>>;
}
