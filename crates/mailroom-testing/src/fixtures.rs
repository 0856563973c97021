//! Request fixtures with sensible defaults.
//!
//! Tests take a fixture and overwrite the fields under test with
//! struct-update syntax.

use mailroom_core::{
    DeliveryMode, MailingListId, MailingListType, ModStatus, ServiceId, ServiceType,
};
use mailroom_writer::{NewMailingList, NewMember, NewService};

/// A valid primary-service request for the fictional "aster" project.
pub fn primary_service() -> NewService {
    NewService {
        service_type: ServiceType::Primary,
        project_uid: "proj-aster".into(),
        project_name: "Aster".into(),
        group_name: "aster".into(),
        prefix: None,
        owners: vec!["owner@aster.dev".into()],
        group_id: None,
        domain: "lists.aster.dev".into(),
    }
}

/// A valid formation-service request for the same project.
pub fn formation_service() -> NewService {
    NewService {
        service_type: ServiceType::Formation,
        project_uid: "proj-aster".into(),
        project_name: "Aster".into(),
        group_name: "aster-formation".into(),
        prefix: Some("formation".into()),
        owners: Vec::new(),
        group_id: None,
        domain: "lists.aster.dev".into(),
    }
}

/// A public discussion list named `aster-dev` under the given service.
pub fn discussion_list(service_uid: ServiceId) -> NewMailingList {
    NewMailingList {
        service_uid,
        group_name: "aster-dev".into(),
        title: "Development".into(),
        description: "Development discussion".into(),
        list_type: MailingListType::Discussion,
        public: true,
        committee_uid: None,
        committee_name: None,
    }
}

/// An ordinary subscription of `dev@aster.dev` to the given list.
pub fn member_of(list_uid: MailingListId) -> NewMember {
    NewMember {
        mailing_list_uid: list_uid,
        email: "dev@aster.dev".into(),
        first_name: "Dana".into(),
        last_name: "Developer".into(),
        organization: None,
        job_title: None,
        delivery_mode: DeliveryMode::Individual,
        mod_status: ModStatus::Member,
    }
}
