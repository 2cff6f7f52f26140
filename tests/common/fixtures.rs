//! Mappings, identities and external objects shared by the integration tests.

use idm_reconciler::connector::ConnectorObject;
use idm_reconciler::{Identity, IdentityKind, Mapping, MappingItem, MappingPurpose};

/// User mapping keyed on the username, with email and password items.
pub fn username_mapping() -> Mapping {
    Mapping::new(IdentityKind::User)
        .with_item(MappingItem::new("uid", "username", MappingPurpose::Both).account_id())
        .with_item(MappingItem::new("mail", "email", MappingPurpose::Both))
        .with_item(MappingItem::new("cn", "fullname", MappingPurpose::Push))
        .with_item(MappingItem::new("__PASSWORD__", "password", MappingPurpose::Push).password())
}

/// User mapping whose account id is the email address, without password.
pub fn email_mapping() -> Mapping {
    Mapping::new(IdentityKind::User)
        .with_item(MappingItem::new("__NAME__", "email", MappingPurpose::Both).account_id())
        .with_item(MappingItem::new("displayName", "fullname", MappingPurpose::Push))
        .with_item(MappingItem::new("employeeNumber", "badge", MappingPurpose::Pull))
}

/// Mapping used on pull sources: account id and email only.
pub fn source_mapping() -> Mapping {
    Mapping::new(IdentityKind::User)
        .with_item(MappingItem::new("uid", "username", MappingPurpose::Both).account_id())
        .with_item(MappingItem::new("mail", "email", MappingPurpose::Both))
}

/// A user with the attributes every mapping above reads.
pub fn user(key: &str) -> Identity {
    Identity::new(IdentityKind::User, key)
        .with_attr("username", key)
        .with_attr("email", format!("{}@example.org", key))
        .with_attr("fullname", format!("{} Example", key))
}

/// An external account as a pull source would hold it.
pub fn account(uid: &str) -> ConnectorObject {
    ConnectorObject::new(uid)
        .with_attr("uid", uid)
        .with_attr("mail", format!("{}@example.org", uid))
}
