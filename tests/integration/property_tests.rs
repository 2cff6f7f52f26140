//! Property-based tests for mapping validation, task planning and pull
//! idempotence.

use crate::common::builders::EnvBuilder;
use crate::common::fixtures::{account, source_mapping, user, username_mapping};
use idm_reconciler::connector::ConnInstance;
use idm_reconciler::error::MappingViolation;
use idm_reconciler::propagation::PropagationManager;
use idm_reconciler::report::ReportOperation;
use idm_reconciler::resource::ResourceMap;
use idm_reconciler::schema::SchemaRegistry;
use idm_reconciler::{
    DomainContext, ExternalResource, IdentityKind, Mapping, MappingItem, MappingPurpose,
    PropagationOperation, SyncTask,
};
use proptest::prelude::*;
use std::collections::BTreeSet;

#[derive(Debug, Clone)]
struct ItemFlags {
    account_id: bool,
    password: bool,
    blank_ext: bool,
    blank_int: bool,
}

fn item_flags() -> impl Strategy<Value = ItemFlags> {
    (any::<bool>(), any::<bool>(), prop::bool::weighted(0.2), prop::bool::weighted(0.2)).prop_map(
        |(account_id, password, blank_ext, blank_int)| ItemFlags {
            account_id,
            password,
            blank_ext,
            blank_int,
        },
    )
}

fn build_mapping(flags: &[ItemFlags]) -> Mapping {
    flags
        .iter()
        .enumerate()
        .fold(Mapping::new(IdentityKind::User), |mapping, (i, f)| {
            let ext = if f.blank_ext { " ".to_string() } else { format!("ext{}", i) };
            let int = if f.blank_int { String::new() } else { format!("int{}", i) };
            let mut item = MappingItem::new(ext, int, MappingPurpose::Both);
            if f.account_id {
                item = item.account_id();
            }
            if f.password {
                item = item.password();
            }
            mapping.with_item(item)
        })
}

proptest! {
    #[test]
    fn mapping_validation_reports_every_violation(flags in prop::collection::vec(item_flags(), 0..8)) {
        let account_ids = flags.iter().filter(|f| f.account_id).count();
        let passwords = flags.iter().filter(|f| f.password).count();
        let mut expected = Vec::new();
        match account_ids {
            0 => expected.push(MappingViolation::MissingAccountId),
            1 => {}
            count => expected.push(MappingViolation::MultipleAccountIds { count }),
        }
        if passwords > 1 {
            expected.push(MappingViolation::MultiplePasswords { count: passwords });
        }
        for (index, f) in flags.iter().enumerate() {
            if f.blank_ext {
                expected.push(MappingViolation::BlankExternalName { index });
            }
            if f.blank_int {
                expected.push(MappingViolation::BlankInternalName { index });
            }
        }

        match build_mapping(&flags).validate("target") {
            Ok(()) => prop_assert!(expected.is_empty()),
            Err(error) => {
                prop_assert_eq!(error.violations.len(), expected.len());
                for violation in &expected {
                    prop_assert!(error.contains(violation), "missing {:?}", violation);
                }
            }
        }
    }

    #[test]
    fn excluded_resources_never_get_tasks(excluded_flags in prop::collection::vec(any::<bool>(), 1..8)) {
        let names: Vec<String> = (0..excluded_flags.len()).map(|i| format!("res-{}", i)).collect();
        let resources: ResourceMap = names
            .iter()
            .map(|name| {
                let resource = ExternalResource::new(name.as_str(), ConnInstance::new("memory"))
                    .with_mapping(username_mapping());
                (name.clone(), resource)
            })
            .collect();
        let schemas = SchemaRegistry::new();
        let identity = names
            .iter()
            .fold(user("prop"), |identity, name| identity.with_resource(name.as_str()));
        let excluded: BTreeSet<String> = names
            .iter()
            .zip(&excluded_flags)
            .filter(|(_, excluded)| **excluded)
            .map(|(name, _)| name.clone())
            .collect();

        let tasks = PropagationManager::new(&resources, &schemas).build_tasks(
            &DomainContext::master(),
            &identity,
            PropagationOperation::Update,
            &excluded,
            None,
        );
        let planned: BTreeSet<String> = tasks.into_iter().map(|task| task.resource).collect();
        let expected: BTreeSet<String> = names.into_iter().filter(|n| !excluded.contains(n)).collect();
        prop_assert_eq!(planned, expected);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn second_pull_without_deltas_is_a_no_op(count in 1usize..6) {
        tokio_test::block_on(async {
            let env = EnvBuilder::new().with_resource("hr", source_mapping()).build().await;
            let hr = env.connector("hr");
            for i in 0..count {
                hr.put_external(IdentityKind::User, account(&format!("emp-{}", i))).await;
            }
            let task = SyncTask::new("hr-pull", "hr", IdentityKind::User);

            let first = env.reconciler.run_synchronization(&env.ctx, &task).await.unwrap();
            assert_eq!(first.summary().succeeded, count);
            let second = env.reconciler.run_synchronization(&env.ctx, &task).await.unwrap();
            assert!(second.entries.iter().all(|e| e.operation == ReportOperation::None));
            assert_eq!(env.user_count().await, count);
        });
    }
}
