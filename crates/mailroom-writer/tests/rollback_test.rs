//! Rollback exhaustiveness under injected faults.
//!
//! Sweeps a storage fault across every mutation a create saga performs
//! and asserts that no constraint, index, record or provider resource
//! survives the abort.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use mailroom_core::{storage::KvStore, ErrorKind, MemoryKvStore, RealClock, RetryPolicy};
use mailroom_testing::{
    discussion_list, formation_service, member_of, FlakyStore, ProviderCall, RecordingProvider,
    RecordingPublisher,
};
use mailroom_writer::{
    MailingListWriter, MemberWriter, NoopPublisher, ServiceWriter, WriterConfig, WriterContext,
};

fn context(store: Arc<dyn KvStore>, provider: Arc<RecordingProvider>) -> WriterContext {
    WriterContext::new(
        store,
        provider,
        Arc::new(NoopPublisher),
        Arc::new(RealClock),
        WriterConfig { sync_enabled: true, retry: RetryPolicy::immediate(1) },
    )
}

fn assert_clean(memory: &MemoryKvStore) {
    for bucket in ["services", "mailing-lists", "members", "constraints"] {
        assert!(
            memory.is_empty(bucket),
            "bucket {bucket} not empty after rollback: {:?}",
            memory.keys(bucket)
        );
    }
}

fn provider_balanced(calls: &[ProviderCall]) {
    let creates = calls.iter().filter(|c| matches!(c, ProviderCall::CreateGroup(..))).count();
    let deletes = calls.iter().filter(|c| matches!(c, ProviderCall::DeleteGroup(..))).count();
    assert_eq!(creates, deletes, "provider group leaked: {calls:?}");

    let sub_creates =
        calls.iter().filter(|c| matches!(c, ProviderCall::CreateSubgroup(..))).count();
    let sub_deletes =
        calls.iter().filter(|c| matches!(c, ProviderCall::DeleteSubgroup(..))).count();
    assert_eq!(sub_creates, sub_deletes, "provider subgroup leaked: {calls:?}");

    let adds = calls.iter().filter(|c| matches!(c, ProviderCall::AddMember(..))).count();
    let removes = calls.iter().filter(|c| matches!(c, ProviderCall::RemoveMember(..))).count();
    assert_eq!(adds, removes, "provider subscription leaked: {calls:?}");
}

// Service create performs four mutations when sync is enabled: the
// constraint reservation, the record put, and two index creates.
#[tokio::test]
async fn service_create_rolls_back_at_every_step() {
    for fail_on in 1..=4 {
        let memory = Arc::new(MemoryKvStore::new());
        let flaky = Arc::new(FlakyStore::failing_on(memory.clone(), fail_on));
        let provider = Arc::new(RecordingProvider::new());
        let writer = ServiceWriter::new(context(flaky, provider.clone()));

        let err = writer.create(formation_service(), &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServiceUnavailable, "fail_on {fail_on}");

        assert_clean(&memory);
        provider_balanced(&provider.calls());
    }
}

#[tokio::test]
async fn service_create_succeeds_with_injection_disarmed() {
    let memory = Arc::new(MemoryKvStore::new());
    let flaky = Arc::new(FlakyStore::failing_on(memory.clone(), 0));
    let provider = Arc::new(RecordingProvider::new());
    let writer = ServiceWriter::new(context(flaky, provider));

    writer.create(formation_service(), &CancellationToken::new()).await.unwrap();
    assert!(!memory.is_empty("services"));
}

#[tokio::test]
async fn provider_rejection_releases_the_constraint() {
    let memory = Arc::new(MemoryKvStore::new());
    let provider = Arc::new(RecordingProvider::new());
    provider.fail_with(mailroom_core::Error::unavailable("provider down"));
    let writer = ServiceWriter::new(context(memory.clone(), provider.clone()));

    let err = writer.create(formation_service(), &CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);

    assert_clean(&memory);
}

// Mailing-list create under a synchronized parent: constraint, record,
// and two index creates (service + project relations).
#[tokio::test]
async fn list_create_rolls_back_at_every_step() {
    for fail_on in 1..=4 {
        let memory = Arc::new(MemoryKvStore::new());
        let flaky = Arc::new(FlakyStore::failing_on(memory.clone(), 0));
        let provider = Arc::new(RecordingProvider::new());
        let ctx = context(flaky.clone(), provider.clone());

        let (service, _) = ServiceWriter::new(ctx.clone())
            .create(formation_service(), &CancellationToken::new())
            .await
            .unwrap();
        let baseline = provider.calls().len();
        flaky.rearm(fail_on);
        let err = MailingListWriter::new(ctx)
            .create(discussion_list(service.uid), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServiceUnavailable, "fail_on {fail_on}");

        assert!(memory.is_empty("mailing-lists"), "fail_on {fail_on}");
        let constraint = mailroom_core::storage::constraint::mailing_list_constraint_key(
            service.uid,
            "aster-dev",
        );
        assert!(
            memory.get("constraints", &constraint).await.is_err(),
            "constraint leaked at fail_on {fail_on}"
        );
        provider_balanced(&provider.calls()[baseline..]);
    }
}

// Member create under a synchronized list: constraint, record, one index.
#[tokio::test]
async fn member_create_rolls_back_at_every_step() {
    for fail_on in 1..=3 {
        let memory = Arc::new(MemoryKvStore::new());
        let flaky = Arc::new(FlakyStore::failing_on(memory.clone(), 0));
        let provider = Arc::new(RecordingProvider::new());
        let ctx = context(flaky.clone(), provider.clone());

        let (service, _) = ServiceWriter::new(ctx.clone())
            .create(formation_service(), &CancellationToken::new())
            .await
            .unwrap();
        let (list, _) = MailingListWriter::new(ctx.clone())
            .create(discussion_list(service.uid), &CancellationToken::new())
            .await
            .unwrap();
        let baseline = provider.calls().len();
        flaky.rearm(fail_on);
        let err = MemberWriter::new(ctx)
            .create(member_of(list.uid), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServiceUnavailable, "fail_on {fail_on}");

        assert!(memory.is_empty("members"), "fail_on {fail_on}");
        let constraint =
            mailroom_core::storage::constraint::member_constraint_key(list.uid, "dev@aster.dev");
        assert!(
            memory.get("constraints", &constraint).await.is_err(),
            "constraint leaked at fail_on {fail_on}"
        );
        provider_balanced(&provider.calls()[baseline..]);
    }
}

#[tokio::test]
async fn publisher_is_quiet_on_aborted_sagas() {
    let memory = Arc::new(MemoryKvStore::new());
    let flaky = Arc::new(FlakyStore::failing_on(memory.clone(), 2));
    let provider = Arc::new(RecordingProvider::new());
    let publisher = Arc::new(RecordingPublisher::new());
    let ctx = WriterContext::new(
        flaky,
        provider,
        publisher.clone(),
        Arc::new(RealClock),
        WriterConfig { sync_enabled: true, retry: RetryPolicy::immediate(1) },
    );

    ServiceWriter::new(ctx).create(formation_service(), &CancellationToken::new()).await.unwrap_err();

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(publisher.messages().is_empty());
}
