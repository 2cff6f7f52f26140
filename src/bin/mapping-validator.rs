//! # External Resource Mapping Validator
//!
//! A command-line utility for checking external resource definition files
//! before they are saved into a reconciler.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin mapping-validator resources/ldap.json
//! cargo run --bin mapping-validator ./resources/
//! ```
//!
//! ## Checks
//!
//! - The file deserializes into an external resource definition
//! - The resource name matches the default naming pattern
//! - Every mapping has exactly one account id item and at most one password
//!   item, and no item has a blank attribute name
//! - Resource names are unique across a directory
//!
//! Connector types and propagation actions are registered in code, so they
//! are not checked here.
//!
//! ## Exit Codes
//!
//! - `0`: All definitions are valid
//! - `1`: One or more definitions are invalid or could not be read

use idm_reconciler::config::ReconcilerConfig;
use idm_reconciler::mapping::Mapping;
use idm_reconciler::{ExternalResource, IdentityKind};
use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::Path;
use std::process;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <resource-file-or-directory>", args[0]);
        eprintln!();
        eprintln!("Examples:");
        eprintln!("  {} resources/ldap.json", args[0]);
        eprintln!("  {} ./resources/", args[0]);
        process::exit(1);
    }

    let path = Path::new(&args[1]);
    if path.is_file() {
        validate_single_file(path);
    } else if path.is_dir() {
        validate_directory(path);
    } else {
        eprintln!("Error: '{}' is not a valid file or directory", path.display());
        process::exit(1);
    }
}

fn validate_single_file(file_path: &Path) {
    println!("Validating resource file: {}", file_path.display());

    match load_and_validate(file_path) {
        Ok(resource) => {
            println!("✓ Resource is valid!");
            print_summary(&resource);
        }
        Err(e) => {
            eprintln!("❌ Resource validation failed: {}", e);
            process::exit(1);
        }
    }
}

fn validate_directory(dir_path: &Path) {
    println!("Validating resources in directory: {}", dir_path.display());

    let entries = match fs::read_dir(dir_path) {
        Ok(entries) => entries,
        Err(e) => {
            eprintln!("Error reading directory: {}", e);
            process::exit(1);
        }
    };

    let mut names = BTreeSet::new();
    let mut valid_count = 0;
    let mut error_count = 0;

    for path in entries.flatten().map(|entry| entry.path()) {
        if path.extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        println!("\nValidating: {}", path.display());

        match load_and_validate(&path) {
            Ok(resource) if !names.insert(resource.name.clone()) => {
                eprintln!("  ❌ Invalid - duplicate resource name '{}'", resource.name);
                error_count += 1;
            }
            Ok(resource) => {
                println!(
                    "  ✓ Valid - {} ({})",
                    resource.name, resource.connector.connector_type
                );
                valid_count += 1;
            }
            Err(e) => {
                eprintln!("  ❌ Invalid - {}", e);
                error_count += 1;
            }
        }
    }

    println!("\nValidation Summary:");
    println!("  Valid resources: {}", valid_count);
    println!("  Invalid resources: {}", error_count);

    if error_count > 0 {
        process::exit(1);
    }
}

fn load_and_validate(file_path: &Path) -> Result<ExternalResource, Box<dyn std::error::Error>> {
    let content = fs::read_to_string(file_path)?;
    let resource: ExternalResource = serde_json::from_str(&content)?;

    let pattern = ReconcilerConfig::default().name_regex()?;
    if !pattern.is_match(&resource.name) {
        return Err(format!(
            "resource name '{}' does not match '{}'",
            resource.name,
            pattern.as_str()
        )
        .into());
    }

    for kind in [IdentityKind::User, IdentityKind::Role] {
        if let Some(mapping) = resource.mapping(kind) {
            if mapping.kind != kind {
                return Err(format!("{} mapping declares kind {}", kind, mapping.kind).into());
            }
            mapping.validate(&resource.name)?;
        }
    }

    Ok(resource)
}

fn print_summary(resource: &ExternalResource) {
    println!();
    println!("Resource Summary:");
    println!("  Name: {}", resource.name);
    println!("  Connector: {}", resource.connector.connector_type);
    println!("  Propagation mode: {:?}", resource.propagation_mode);
    if let Some(priority) = resource.propagation_priority {
        println!("  Priority: {}", priority);
    }
    if !resource.propagation_actions.is_empty() {
        println!("  Actions: {}", resource.propagation_actions.join(", "));
    }
    for kind in [IdentityKind::User, IdentityKind::Role] {
        if let Some(mapping) = resource.mapping(kind) {
            print_mapping(kind, mapping);
        }
    }
}

fn print_mapping(kind: IdentityKind, mapping: &Mapping) {
    println!("  {} mapping: {} item(s)", kind, mapping.items.len());
    if let Some(account_id) = mapping.account_id_attribute() {
        println!("    Account id: {}", account_id);
    }
    if let Some(password) = mapping.password_item() {
        println!("    Password: {}", password.ext_attr_name);
    }
    println!("    Push items: {}", mapping.push_items().count());
    println!("    Pull items: {}", mapping.pull_items().count());
}
