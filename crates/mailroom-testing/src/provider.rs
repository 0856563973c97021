//! Recording double for the external provider seam.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex,
};

use mailroom_core::{storage::BoxFuture, Error, MailingList, Member, Result, Service};
use mailroom_writer::ProviderSync;

/// One recorded provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    /// `create_group(domain, group_name)`.
    CreateGroup(String, String),
    /// `delete_group(domain, group_id)`.
    DeleteGroup(String, u64),
    /// `create_subgroup(domain, group_id, group_name)`.
    CreateSubgroup(String, u64, String),
    /// `delete_subgroup(domain, subgroup_id)`.
    DeleteSubgroup(String, u64),
    /// `add_member(domain, subgroup_id, email)`.
    AddMember(String, u64, String),
    /// `remove_member(domain, member_id)`.
    RemoveMember(String, u64),
    /// `update_member(domain, member_id, email)`.
    UpdateMember(String, u64, String),
}

/// Provider double that records every call and assigns sequential ids.
///
/// An armed failure makes all subsequent calls fail until cleared, which
/// is enough to abort a saga at the provider step.
#[derive(Default)]
pub struct RecordingProvider {
    calls: Mutex<Vec<ProviderCall>>,
    next_id: AtomicU64,
    failure: Mutex<Option<Error>>,
}

impl RecordingProvider {
    /// A provider that accepts everything, assigning ids from 1000.
    pub fn new() -> Self {
        Self { calls: Mutex::new(Vec::new()), next_id: AtomicU64::new(1000), failure: Mutex::new(None) }
    }

    /// Makes every subsequent call fail with `error`.
    pub fn fail_with(&self, error: Error) {
        *self.failure.lock().unwrap() = Some(error);
    }

    /// Clears an armed failure.
    pub fn recover(&self) {
        *self.failure.lock().unwrap() = None;
    }

    /// Snapshot of the recorded calls.
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: ProviderCall) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        match self.failure.lock().unwrap().as_ref() {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn assign_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

impl ProviderSync for RecordingProvider {
    fn create_group<'a>(
        &'a self,
        domain: &'a str,
        service: &'a Service,
    ) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            self.record(ProviderCall::CreateGroup(domain.into(), service.group_name.clone()))?;
            Ok(self.assign_id())
        })
    }

    fn delete_group<'a>(&'a self, domain: &'a str, group_id: u64) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.record(ProviderCall::DeleteGroup(domain.into(), group_id)) })
    }

    fn create_subgroup<'a>(
        &'a self,
        domain: &'a str,
        group_id: u64,
        list: &'a MailingList,
    ) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            self.record(ProviderCall::CreateSubgroup(
                domain.into(),
                group_id,
                list.group_name.clone(),
            ))?;
            Ok(self.assign_id())
        })
    }

    fn delete_subgroup<'a>(
        &'a self,
        domain: &'a str,
        subgroup_id: u64,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.record(ProviderCall::DeleteSubgroup(domain.into(), subgroup_id))
        })
    }

    fn add_member<'a>(
        &'a self,
        domain: &'a str,
        subgroup_id: u64,
        member: &'a Member,
    ) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            self.record(ProviderCall::AddMember(
                domain.into(),
                subgroup_id,
                member.email.clone(),
            ))?;
            Ok(self.assign_id())
        })
    }

    fn remove_member<'a>(&'a self, domain: &'a str, member_id: u64) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.record(ProviderCall::RemoveMember(domain.into(), member_id)) })
    }

    fn update_member<'a>(
        &'a self,
        domain: &'a str,
        member_id: u64,
        member: &'a Member,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.record(ProviderCall::UpdateMember(
                domain.into(),
                member_id,
                member.email.clone(),
            ))
        })
    }
}
