//! Resource, mapping and schema validation at save time.

use crate::common::builders::EnvBuilder;
use crate::common::fixtures::{user, username_mapping};
use idm_reconciler::connector::ConnInstance;
use idm_reconciler::error::MappingViolation;
use idm_reconciler::schema::{AttributeType, PlainSchema, SchemaDefinition};
use idm_reconciler::{
    ExternalResource, IdentityKind, IdentityPatch, Mapping, MappingItem, MappingPurpose,
    ReconcilerError, ValidationError,
};

#[tokio::test]
async fn test_unregistered_connector_and_action_fail_fast() {
    let env = EnvBuilder::new().with_resource("ldap", username_mapping()).build().await;

    let unknown_connector = ExternalResource::new("crm", ConnInstance::new("soap-crm"))
        .with_mapping(username_mapping());
    let result = env.reconciler.save_resource(&env.ctx, &unknown_connector).await;
    assert_error_message_contains!(result, "unregistered connector type 'soap-crm'");

    let unknown_action = ExternalResource::new("ldap-2", ConnInstance::new("ldap"))
        .with_mapping(username_mapping())
        .with_action("ldap-password-policy");
    let result = env.reconciler.save_resource(&env.ctx, &unknown_action).await;
    assert_error_variant!(result, ReconcilerError::Configuration { .. });

    let bad_name = ExternalResource::new("bad name", ConnInstance::new("ldap"));
    assert_error_variant!(
        env.reconciler.save_resource(&env.ctx, &bad_name).await,
        ReconcilerError::Configuration { .. }
    );

    let resources = env.reconciler.store().resources(&env.ctx).await.unwrap();
    assert_eq!(resources.keys().collect::<Vec<_>>(), vec!["ldap"]);
}

#[tokio::test]
async fn test_invalid_mapping_lists_every_violation() {
    let env = EnvBuilder::new().with_resource("ldap", username_mapping()).build().await;
    let mapping = Mapping::new(IdentityKind::User)
        .with_item(MappingItem::new("mail", "email", MappingPurpose::Both))
        .with_item(MappingItem::new("", "fullname", MappingPurpose::Push))
        .with_item(MappingItem::new("pwd", "password", MappingPurpose::Push).password())
        .with_item(MappingItem::new("pwd2", "password", MappingPurpose::Push).password());
    let resource = ExternalResource::new("ldap-2", ConnInstance::new("ldap")).with_mapping(mapping);

    match env.reconciler.save_resource(&env.ctx, &resource).await {
        Err(ReconcilerError::InvalidMapping(error)) => {
            assert_eq!(error.resource, "ldap-2");
            assert_eq!(error.violations.len(), 3);
            assert!(error.contains(&MappingViolation::MissingAccountId));
            assert!(error.contains(&MappingViolation::MultiplePasswords { count: 2 }));
            assert!(error.contains(&MappingViolation::BlankExternalName { index: 1 }));
        }
        other => panic!("expected an invalid mapping, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_unique_attribute_violation_is_rejected() {
    let env = EnvBuilder::new().build().await;
    for schema in [
        PlainSchema::new(IdentityKind::User, "username", AttributeType::String).mandatory(),
        PlainSchema::new(IdentityKind::User, "email", AttributeType::String).unique(),
        PlainSchema::new(IdentityKind::User, "fullname", AttributeType::String),
    ] {
        env.reconciler
            .save_schema(&env.ctx, SchemaDefinition::Plain(schema))
            .await
            .unwrap();
    }

    env.reconciler.create_identity(&env.ctx, user("vera"), None).await.unwrap();
    let clash = user("walt").with_attr("email", "vera@example.org");
    match env.reconciler.create_identity(&env.ctx, clash, None).await {
        Err(ReconcilerError::Validation(ValidationError::UniquenessViolation { attribute, owner, .. })) => {
            assert_eq!(attribute, "email");
            assert_eq!(owner, "vera");
        }
        other => panic!("expected a uniqueness violation, got {:?}", other.map(|_| ())),
    }
    assert!(env.identity("walt").await.is_none());

    env.reconciler.create_identity(&env.ctx, user("walt"), None).await.unwrap();
    let result = env
        .reconciler
        .update_identity(
            &env.ctx,
            IdentityKind::User,
            "walt",
            IdentityPatch::new().with_attr("email", "vera@example.org"),
        )
        .await;
    assert_error_message_contains!(result, "already used by 'vera'");

    // unknown attributes are rejected once schemas exist
    let result = env
        .reconciler
        .create_identity(&env.ctx, user("xena").with_attr("shoe_size", "42"), None)
        .await;
    assert_error_variant!(
        result,
        ReconcilerError::Validation(ValidationError::UnknownAttribute { .. })
    );
}
