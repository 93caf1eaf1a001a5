// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Appliance registry: validates appliances and folds them into one
//! registration, enforcing name uniqueness per composition.

use quilt_proto::Bucket;
use quilt_resolve::{typename_resolver, wrap, Handler, ResolverTree, WrapOptions, Wrapped, WrappedResolver};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::fragment::Appliance;
use crate::validate::validate_appliance;
use crate::{sdl, DirectiveHandler, SchemaError};

/// Fragment names registered during one composition.
#[derive(Debug, Clone, Default)]
pub struct RegisteredNames {
    names: BTreeSet<String>,
}

impl RegisteredNames {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `name`; a second insertion fails with [`SchemaError::DuplicateName`].
    pub fn insert(&mut self, name: &str) -> Result<(), SchemaError> {
        if self.names.insert(name.to_owned()) {
            Ok(())
        } else {
            Err(SchemaError::DuplicateName(name.to_owned()))
        }
    }

    /// True once `name` has been registered.
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Registered names in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

/// Normalized texts and callables collected from appliances.
#[derive(Debug, Clone, Default)]
pub struct Registration {
    /// Normalized SDL, in registration order.
    pub type_texts: Vec<String>,
    /// Enum mappings, scalar validators, type resolvers and object field resolvers.
    pub resolvers: ResolverTree,
    /// Directive visitors, kept apart from the resolver tree.
    pub directives: Vec<DirectiveHandler>,
}

impl Registration {
    /// All registered texts merged into one document.
    pub fn merged_text(&self) -> Result<String, SchemaError> {
        sdl::merge_and_print(&self.type_texts)
    }

    fn add(&mut self, appliance: &Appliance, names: &mut RegisteredNames) -> Result<(), SchemaError> {
        if let Appliance::Global(global) = appliance {
            for source in &global.sources {
                self.type_texts.push(source.text()?);
            }
            return Ok(());
        }
        let (name, text) = validate_appliance(appliance)?;
        names.insert(&name)?;
        self.type_texts.push(text);
        debug!(fragment = %name, "registering appliance");
        match appliance {
            Appliance::Scalar(f) => {
                if let Some(validator) = &f.validator {
                    self.resolvers.scalars.insert(name, validator.clone());
                }
            }
            Appliance::Enum(f) => {
                if let Some(mapping) = &f.mapping {
                    self.resolvers.enums.insert(name, mapping.clone());
                }
            }
            Appliance::Directive(f) => self.directives.push(DirectiveHandler {
                name,
                visitor: f.visitor.clone(),
            }),
            Appliance::Abstract(f) => {
                let resolver = f.resolve_type.clone().unwrap_or_else(typename_resolver);
                self.resolvers.abstracts.insert(name, resolver);
            }
            Appliance::Object(f) => {
                let mut fields = BTreeMap::new();
                for (field, handler) in &f.fields {
                    let options = WrapOptions::named(format!("{name}.{}.{field}", Bucket::Fields));
                    fields.insert(field.clone(), field_resolver(handler, options)?);
                }
                self.resolvers.fields.entry(name).or_default().extend(fields);
            }
            Appliance::Global(_) => {}
        }
        Ok(())
    }
}

/// Wrap a field resolver; a subscription handler is the wrong shape here.
pub(crate) fn field_resolver(handler: &Handler, options: WrapOptions) -> Result<WrappedResolver, SchemaError> {
    let qualified = options.qualified_name.clone();
    match wrap(handler, options) {
        Wrapped::Resolver(resolver) => Ok(resolver),
        Wrapped::Subscriber(_) => Err(SchemaError::config(format!(
            "`{qualified}` is a subscription handler where a field resolver is expected"
        ))),
    }
}

/// Register `appliances` into `registration`, by kind: scalars, enums,
/// directives, unions/interfaces, object types, then global text.
pub fn register_into(
    appliances: &[Appliance],
    names: &mut RegisteredNames,
    registration: &mut Registration,
) -> Result<(), SchemaError> {
    let mut ordered: Vec<&Appliance> = appliances.iter().collect();
    ordered.sort_by_key(|a| a.rank());
    for appliance in ordered {
        registration.add(appliance, names)?;
    }
    Ok(())
}

/// Register `appliances` into a fresh [`Registration`].
pub fn register(
    appliances: &[Appliance],
    names: &mut RegisteredNames,
) -> Result<Registration, SchemaError> {
    let mut registration = Registration::default();
    register_into(appliances, names, &mut registration)?;
    Ok(registration)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fragment::{AbstractFragment, EnumFragment, GlobalText, ObjectFragment, ScalarFragment};
    use crate::{validate, Checks, DeclKind, RemoveAnnotatedFields};
    use quilt_resolve::scalar_validator;
    use futures::StreamExt;
    use serde_json::json;
    use std::sync::Arc;

    fn appliances() -> Vec<Appliance> {
        vec![
            GlobalText::many(["type Extra { x: Int }", "type More { y: Int }"]).into(),
            ObjectFragment::new("Stats", "type Stats { total: Int avg: Float }")
                .unwrap()
                .field("total", Handler::value(json!(10)))
                .unwrap()
                .into(),
            ScalarFragment::new("Date", "scalar Date")
                .unwrap()
                .validator(scalar_validator(|v| Ok(v.clone())))
                .into(),
            EnumFragment::new("Role", "enum Role { ADMIN GUEST }")
                .unwrap()
                .values(BTreeMap::from([
                    ("ADMIN".to_owned(), json!("a")),
                    ("GUEST".to_owned(), json!("g")),
                ]))
                .into(),
            AbstractFragment::union("Hit", "union Hit = Stats").unwrap().into(),
            crate::DirectiveFragment::new(
                "internal",
                "directive @internal on FIELD_DEFINITION",
                Arc::new(RemoveAnnotatedFields),
            )
            .unwrap()
            .into(),
        ]
    }

    #[test]
    fn registration_collects_every_kind() {
        let mut names = RegisteredNames::new();
        let reg = register(&appliances(), &mut names).unwrap();

        assert_eq!(
            names.iter().collect::<Vec<_>>(),
            vec!["Date", "Hit", "Role", "Stats", "internal"]
        );
        assert!(reg.resolvers.scalars.contains_key("Date"));
        assert!(reg.resolvers.enums.contains_key("Role"));
        assert!(reg.resolvers.abstracts.contains_key("Hit"));
        assert!(reg.resolvers.field("Stats", "total").is_some());
        assert_eq!(reg.directives[0].name, "internal");

        let merged = reg.merged_text().unwrap();
        assert!(merged.contains("scalar Date"));
        assert!(merged.contains("type Extra"));
        assert!(merged.contains("type More"));
    }

    #[test]
    fn same_name_twice_is_a_duplicate_regardless_of_kind() {
        let mut names = RegisteredNames::new();
        let list: Vec<Appliance> = vec![
            EnumFragment::new("Thing", "enum Thing { A }").unwrap().into(),
            ScalarFragment::new("Thing", "scalar Thing").unwrap().into(),
        ];
        let err = register(&list, &mut names).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateName(ref n) if n == "Thing"));
    }

    #[test]
    fn subscription_field_resolvers_are_rejected_not_dropped() {
        let mut stats = ObjectFragment::new("Stats", "type Stats { total: Int }").unwrap();
        let stream = Handler::subscribe(|_| async { Ok(futures::stream::empty().boxed()) });
        stats.fields.insert("total".to_owned(), stream);
        let mut names = RegisteredNames::new();
        let err = register(&[stats.into()], &mut names).unwrap_err();
        assert!(matches!(err, SchemaError::Configuration(_)), "{err}");
        assert!(err.to_string().contains("Stats.Fields.total"), "{err}");
    }

    #[test]
    fn registered_texts_validate_again() {
        let mut names = RegisteredNames::new();
        let reg = register(&appliances(), &mut names).unwrap();
        let merged = reg.merged_text().unwrap();
        for (name, kind) in [
            ("Date", DeclKind::Scalar),
            ("Role", DeclKind::Enum),
            ("Hit", DeclKind::Union),
            ("Stats", DeclKind::Object),
            ("internal", DeclKind::Directive),
        ] {
            assert!(validate(name, &merged, kind, &Checks::Declaration).is_ok(), "{name}");
        }
    }
}
