use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::debug;

use crate::error::Error;
use crate::path::{self, PropertyPath};
use crate::schema::access::AccessRules;
use crate::schema::container::{ContainerId, ContainerRole, ContainerShape, PropertiesContainer};
use crate::schema::declaration::{
    ContainerDecl, PropertyDecl, PropertyKindDecl, SchemaDocument,
};
use crate::schema::handler::{
    AggregateDef, AggregateFunction, CollectionStorage, HandlerKind, MetaKind, Persistence,
    PropertyHandler,
};
use crate::value::ResourceRef;
use crate::value_type::{ScalarKind, ValueType};

static NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier pattern"));

fn check_name(what: &str, name: &str) -> Result<(), Error> {
    if NAME.is_match(name) {
        Ok(())
    } else {
        Err(Error::schema_error(
            name,
            format!("{} name must be an identifier", what),
        ))
    }
}

/// Immutable registry of all property containers.
///
/// Built once by [SchemaBuilder] and shared read-only afterwards; the only interior
/// mutability is the per-container path cache, which is safe for concurrent use.
#[derive(Debug, Default)]
pub struct Schema {
    containers: Vec<PropertiesContainer>,
    names: HashMap<String, ContainerId>,
}

impl Schema {
    pub fn from_document(document: SchemaDocument) -> Result<Schema, Error> {
        SchemaBuilder::from_document(document).build()
    }

    pub fn container(&self, id: ContainerId) -> &PropertiesContainer {
        &self.containers[id.0]
    }

    pub fn container_id(&self, name: &str) -> Option<ContainerId> {
        self.names.get(name).copied()
    }

    pub fn container_by_name(&self, name: &str) -> Result<&PropertiesContainer, Error> {
        self.container_id(name)
            .map(|id| self.container(id))
            .ok_or_else(|| Error::unknown_container(name))
    }

    /// Container of a top level resource type
    pub fn resource(&self, name: &str) -> Result<&PropertiesContainer, Error> {
        match self.container_by_name(name) {
            Ok(c) if c.is_resource() => Ok(c),
            Ok(_) => Err(Error::schema_error(name, "not a resource type".to_owned())),
            Err(e) => Err(e),
        }
    }

    pub fn containers(&self) -> impl Iterator<Item = &PropertiesContainer> {
        self.containers.iter()
    }

    pub fn resources(&self) -> impl Iterator<Item = &PropertiesContainer> {
        self.containers.iter().filter(|c| c.is_resource())
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    /// Resolve a dotted property path starting at the named container
    pub fn resolve(&self, container: &str, path: &str) -> Result<Arc<PropertyPath>, Error> {
        let start = self.container_by_name(container)?;
        path::resolve(self, start.id(), path)
    }

    /// Parse `<type>#<id>`, checking the type is a registered resource and coercing the id.
    pub fn parse_reference(&self, text: &str) -> Result<ResourceRef, Error> {
        let (type_name, id_text) = ResourceRef::split(text)?;
        let resource = self
            .container_id(type_name)
            .map(|id| self.container(id))
            .filter(|c| c.is_resource())
            .ok_or_else(|| {
                Error::conversion_error_with_message(
                    text,
                    "reference",
                    &format!("unknown resource type '{}'", type_name),
                )
            })?;
        let id_handler = resource.id_handler().ok_or_else(|| {
            Error::conversion_error_with_message(
                text,
                "reference",
                &format!("resource type '{}' has no identifier", type_name),
            )
        })?;
        let id = id_handler.value_type().parse(id_text, self)?;
        Ok(ResourceRef::new(resource.name(), id))
    }

    pub fn reference_to_text(&self, reference: &ResourceRef) -> Result<String, Error> {
        let resource = self.resource(&reference.resource_type)?;
        let id_handler = resource.id_handler().ok_or_else(|| {
            Error::schema_error(resource.name(), "resource has no identifier".to_owned())
        })?;
        let id = id_handler.value_type().to_text(&reference.id)?;
        Ok(format!("{}#{}", resource.name(), id))
    }
}

struct Pending<'a> {
    container: ContainerId,
    decl: &'a PropertyDecl,
}

/// Two-phase construction of a [Schema].
///
/// All container skeletons are allocated first, so declarations may refer to each
/// other in any order. Handlers referring to other containers (dependent references,
/// aggregates) are resolved once every plain handler exists; polymorphic variants
/// inherit the handlers of their base last.
#[derive(Debug, Clone, Default)]
pub struct SchemaBuilder {
    document: SchemaDocument,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        SchemaBuilder::default()
    }

    pub fn from_document(document: SchemaDocument) -> Self {
        SchemaBuilder { document }
    }

    pub fn add_resource(mut self, decl: ContainerDecl) -> Self {
        self.document.resources.push(decl);
        self
    }

    pub fn add_object(mut self, decl: ContainerDecl) -> Self {
        self.document.objects.push(decl);
        self
    }

    pub fn build(self) -> Result<Schema, Error> {
        let mut schema = Schema::default();
        let mut own: Vec<(ContainerId, &[PropertyDecl])> = Vec::new();

        // Phase 1: skeletons
        let declared = self
            .document
            .resources
            .iter()
            .map(|d| (d, true))
            .chain(self.document.objects.iter().map(|d| (d, false)));
        for (decl, is_resource) in declared {
            check_name("Type", &decl.name)?;
            let role = if is_resource {
                ContainerRole::Resource {
                    persistent: decl.persistent,
                }
            } else {
                ContainerRole::Object
            };
            let base = ContainerId(schema.containers.len());
            let shape = match &decl.discriminator {
                Some(discriminator) => {
                    check_name("Property", discriminator)?;
                    if decl.variants.is_empty() {
                        return Err(Error::schema_error(
                            &decl.name,
                            "polymorphic type without variants".to_owned(),
                        ));
                    }
                    let variants = decl
                        .variants
                        .iter()
                        .enumerate()
                        .map(|(i, v)| (v.name.clone(), ContainerId(base.0 + 1 + i)))
                        .collect::<BTreeMap<_, _>>();
                    ContainerShape::Polymorphic {
                        discriminator: discriminator.clone(),
                        variants,
                    }
                }
                None if !decl.variants.is_empty() => {
                    return Err(Error::schema_error(
                        &decl.name,
                        "variants declared without a discriminator".to_owned(),
                    ));
                }
                None => ContainerShape::Plain,
            };
            register(&mut schema, &decl.name, role.clone(), shape)?;
            own.push((base, &decl.properties));
            for variant in decl.variants.iter() {
                check_name("Type", &variant.name)?;
                let id = register(
                    &mut schema,
                    &variant.name,
                    role.clone(),
                    ContainerShape::Concrete {
                        tag: variant.name.clone(),
                        base,
                    },
                )?;
                own.push((id, &variant.properties));
            }
            debug!(name = %decl.name, variants = decl.variants.len(), "registered container");
        }

        // Phase 2: discriminators and handlers not depending on other containers
        let mut deferred = Vec::new();
        for (id, properties) in own.iter() {
            if let ContainerShape::Polymorphic {
                discriminator,
                variants,
            } = schema.container(*id).shape().clone()
            {
                let persisted = schema.container(*id).holds_persistent_data();
                let handler = PropertyHandler::new(
                    discriminator.clone(),
                    HandlerKind::Type,
                    ValueType::Enum(variants.keys().cloned().collect()),
                )
                .with_nullable(false)
                .with_persistence(persisted.then(|| Persistence::field(discriminator)));
                add(&mut schema, *id, handler)?;
            }
            for decl in properties.iter() {
                match effective_kind(decl, schema.container(*id).name())? {
                    PropertyKindDecl::DependentReference
                    | PropertyKindDecl::Aggregate
                    | PropertyKindDecl::DependentAggregate => deferred.push(Pending {
                        container: *id,
                        decl,
                    }),
                    kind => {
                        let handler = build_handler(&schema, *id, decl, kind)?;
                        add(&mut schema, *id, handler)?;
                    }
                }
            }
        }

        // Phase 3: cross-container handlers, bases first
        let (variant_deferred, base_deferred): (Vec<_>, Vec<_>) = deferred
            .into_iter()
            .partition(|p| schema.container(p.container).is_concrete_variant());
        complete(&mut schema, base_deferred)?;

        // Phase 4: variants inherit the base handlers
        for index in 0..schema.containers.len() {
            if let Some(base) = schema.containers[index].base() {
                let inherited = schema.container(base).handlers().cloned().collect::<Vec<_>>();
                let container = &mut schema.containers[index];
                container.inherit(inherited).map_err(|name| {
                    Error::property_schema_error(
                        container.name(),
                        &name,
                        "hides a property of the polymorphic base".to_owned(),
                    )
                })?;
            }
        }
        complete(&mut schema, variant_deferred)?;

        for container in schema.containers.iter() {
            validate_container(container)?;
        }
        debug!(containers = schema.containers.len(), "schema built");
        Ok(schema)
    }
}

fn register(
    schema: &mut Schema,
    name: &str,
    role: ContainerRole,
    shape: ContainerShape,
) -> Result<ContainerId, Error> {
    if schema.names.contains_key(name) {
        return Err(Error::schema_error(name, "declared twice".to_owned()));
    }
    let id = ContainerId(schema.containers.len());
    schema
        .containers
        .push(PropertiesContainer::new(id, name.to_owned(), role, shape));
    schema.names.insert(name.to_owned(), id);
    Ok(id)
}

fn add(schema: &mut Schema, id: ContainerId, handler: PropertyHandler) -> Result<(), Error> {
    let container = &mut schema.containers[id.0];
    if handler.is_id() && container.id_handler().is_some() {
        return Err(Error::property_schema_error(
            container.name(),
            handler.name(),
            "second identifier".to_owned(),
        ));
    }
    let name = handler.name().to_owned();
    if !container.add_handler(Arc::new(handler)) {
        return Err(Error::property_schema_error(
            container.name(),
            name,
            "declared twice".to_owned(),
        ));
    }
    Ok(())
}

fn complete(schema: &mut Schema, pending: Vec<Pending>) -> Result<(), Error> {
    // Dependent references first: dependent aggregates are computed over them
    let (references, aggregates): (Vec<_>, Vec<_>) = pending.into_iter().partition(|p| {
        matches!(p.decl.kind, Some(PropertyKindDecl::DependentReference))
    });
    for p in references.into_iter().chain(aggregates) {
        let kind = p.decl.kind.unwrap_or(PropertyKindDecl::Simple);
        let handler = build_handler(schema, p.container, p.decl, kind)?;
        add(schema, p.container, handler)?;
    }
    Ok(())
}

/// Containers whose properties are stored: persistent resources and embedded objects
fn effective_kind(decl: &PropertyDecl, container: &str) -> Result<PropertyKindDecl, Error> {
    if let Some(kind) = decl.kind {
        return Ok(kind);
    }
    let value_type = declared_type(decl, container)?;
    Ok(match value_type.leaf() {
        ValueType::Object(_) => PropertyKindDecl::Object,
        ValueType::Reference(_) => PropertyKindDecl::Reference,
        _ => PropertyKindDecl::Simple,
    })
}

fn declared_type(decl: &PropertyDecl, container: &str) -> Result<ValueType, Error> {
    crate::parse::parse_value_type(&decl.value_type).map_err(|e| {
        Error::property_schema_error(container, &decl.name, e.message)
    })
}

/// Every object and reference mentioned in the type is registered; map keys are keyable.
fn check_type_names(
    schema: &Schema,
    container: &str,
    property: &str,
    value_type: &ValueType,
) -> Result<(), Error> {
    let fail = |message: String| Err(Error::property_schema_error(container, property, message));
    match value_type {
        ValueType::Object(o) => match schema.container_by_name(&o.type_name) {
            Ok(c) if !c.is_resource() => Ok(()),
            Ok(_) => fail(format!(
                "'{}' is a resource and can't be embedded, use a reference",
                o.type_name
            )),
            Err(_) => fail(format!("unknown object type '{}'", o.type_name)),
        },
        ValueType::Reference(r) if r.is_wildcard() => Ok(()),
        ValueType::Reference(r) => match schema.container_by_name(&r.target) {
            Ok(c) if c.is_resource() => Ok(()),
            _ => fail(format!("reference to unknown resource '{}'", r.target)),
        },
        ValueType::Enum(values) if values.is_empty() => fail("enum without values".to_owned()),
        ValueType::List(inner) | ValueType::Set(inner) => {
            check_type_names(schema, container, property, inner)
        }
        ValueType::Map(key, inner) => {
            if !key.is_keyable() {
                return fail(format!("map key type {} is not a scalar or reference", key));
            }
            check_type_names(schema, container, property, key)?;
            check_type_names(schema, container, property, inner)
        }
        _ => Ok(()),
    }
}

fn build_handler(
    schema: &Schema,
    id: ContainerId,
    decl: &PropertyDecl,
    kind: PropertyKindDecl,
) -> Result<PropertyHandler, Error> {
    let container = schema.container(id);
    let cname = container.name();
    check_name("Property", &decl.name)?;
    let value_type = declared_type(decl, cname)?;
    check_type_names(schema, cname, &decl.name, &value_type)?;
    let fail = |message: &str| Error::property_schema_error(cname, &decl.name, message.to_owned());

    let handler_kind = match kind {
        PropertyKindDecl::Id => {
            if !container.is_resource() || container.is_concrete_variant() {
                return Err(fail("only resources declare an identifier"));
            }
            if !value_type.is_keyable() {
                return Err(fail("identifier must be a single scalar or reference"));
            }
            HandlerKind::Id
        }
        PropertyKindDecl::Simple => {
            if value_type.is_object() || value_type.is_reference() {
                return Err(fail("object or reference value declared as a simple property"));
            }
            HandlerKind::Simple
        }
        PropertyKindDecl::Object => {
            if !value_type.is_object() {
                return Err(fail("object property must have an object type"));
            }
            HandlerKind::Object
        }
        PropertyKindDecl::Reference => {
            if !value_type.is_reference() {
                return Err(fail("reference property must have a reference type"));
            }
            HandlerKind::Reference
        }
        PropertyKindDecl::Meta => {
            let meta = decl.meta.ok_or_else(|| fail("meta property without 'meta' kind"))?;
            let valid = match meta {
                MetaKind::Version => matches!(
                    value_type,
                    ValueType::Scalar(ScalarKind::Long) | ValueType::Scalar(ScalarKind::Integer)
                ),
                MetaKind::Created | MetaKind::Modified => {
                    value_type == ValueType::Scalar(ScalarKind::Date)
                }
            };
            if !valid {
                return Err(fail("wrong value type for a meta property"));
            }
            HandlerKind::Meta(meta)
        }
        PropertyKindDecl::DependentReference => dependent_reference(schema, container, decl, &value_type)?,
        PropertyKindDecl::Aggregate | PropertyKindDecl::DependentAggregate => {
            aggregate(schema, container, decl, kind, &value_type)?
        }
    };

    let computed = matches!(
        handler_kind,
        HandlerKind::DependentReference { .. }
            | HandlerKind::Aggregate(_)
            | HandlerKind::DependentAggregate(_)
    );
    let persistence = if container.holds_persistent_data() && !decl.transient && !computed {
        if value_type.degree() > 1 {
            return Err(fail("persisted property with nested collections"));
        }
        let collection = match &decl.storage {
            Some(storage) => {
                if value_type.degree() != 1 {
                    return Err(fail("separate storage requires a collection property"));
                }
                let parent_field = storage
                    .parent_field
                    .clone()
                    .ok_or_else(|| fail("separate storage without a parent link field"))?;
                match (value_type.is_map(), &storage.key_field) {
                    (true, None) => return Err(fail("map storage without a key field")),
                    (false, Some(_)) => return Err(fail("key field declared for a non-map")),
                    _ => {}
                }
                Some(CollectionStorage {
                    name: storage.collection.clone(),
                    parent_field,
                    key_field: storage.key_field.clone(),
                })
            }
            None => None,
        };
        Some(Persistence {
            field: decl.field.clone().unwrap_or_else(|| decl.name.clone()),
            collection,
        })
    } else {
        if decl.storage.is_some() {
            return Err(fail("storage declared for a property that is not persisted"));
        }
        None
    };

    if !decl.fetched_by_default && !decl.nullable {
        return Err(fail("a property not fetched by default must be nullable"));
    }

    let handler = PropertyHandler::new(decl.name.clone(), handler_kind, value_type);
    let settable = handler.is_settable() && !decl.read_only;
    Ok(handler
        .with_access(AccessRules::from_declaration(&decl.access))
        .with_persistence(persistence)
        .with_gettable(!decl.write_only)
        .with_settable(settable)
        .with_fetched_by_default(decl.fetched_by_default)
        .with_nullable(decl.nullable))
}

fn dependent_reference(
    schema: &Schema,
    container: &PropertiesContainer,
    decl: &PropertyDecl,
    value_type: &ValueType,
) -> Result<HandlerKind, Error> {
    let fail = |message: String| Error::property_schema_error(container.name(), &decl.name, message);
    let reverse = decl
        .reverse
        .clone()
        .ok_or_else(|| fail("dependent reference without 'reverse'".to_owned()))?;
    let target = match value_type.reference_type() {
        Some(r) if !r.is_wildcard() && value_type.degree() <= 1 => r.target.clone(),
        _ => {
            return Err(fail(
                "dependent reference must be a reference or a collection of references".to_owned(),
            ))
        }
    };
    let target_container = schema.resource(&target)?;
    let back = target_container
        .handler(&reverse)
        .ok_or_else(|| fail(format!("'{}' has no property '{}'", target, reverse)))?;
    let source_name = match container.base() {
        Some(base) => schema.container(base).name(),
        None => container.name(),
    };
    let points_back = matches!(back.kind(), HandlerKind::Reference)
        && !back.value_type().is_collection()
        && back
            .value_type()
            .reference_type()
            .is_some_and(|r| r.target == source_name || r.target == container.name());
    if !points_back {
        return Err(fail(format!(
            "'{}.{}' must be a single reference to '{}'",
            target, reverse, source_name
        )));
    }
    if !back.is_persisted() {
        return Err(fail(format!("'{}.{}' is not persisted", target, reverse)));
    }
    Ok(HandlerKind::DependentReference { reverse })
}

fn aggregate(
    schema: &Schema,
    container: &PropertiesContainer,
    decl: &PropertyDecl,
    kind: PropertyKindDecl,
    value_type: &ValueType,
) -> Result<HandlerKind, Error> {
    let fail = |message: String| Error::property_schema_error(container.name(), &decl.name, message);
    let def = decl
        .aggregate
        .as_ref()
        .ok_or_else(|| fail("aggregate without definition".to_owned()))?;
    if !decl.nullable {
        return Err(fail("aggregate must be nullable".to_owned()));
    }
    let receiving = match value_type {
        ValueType::Scalar(k) => *k,
        _ => return Err(fail("aggregate must be a single scalar".to_owned())),
    };
    let collection = container
        .handler(&def.collection)
        .ok_or_else(|| fail(format!("unknown collection property '{}'", def.collection)))?;
    let dependent = kind == PropertyKindDecl::DependentAggregate;
    let collection_ok = if dependent {
        matches!(collection.kind(), HandlerKind::DependentReference { .. })
    } else {
        collection.value_type().is_collection()
            && (collection.is_object() || matches!(collection.kind(), HandlerKind::Reference))
    };
    if !collection_ok {
        return Err(fail(format!(
            "'{}' is not a {}",
            def.collection,
            if dependent {
                "dependent reference"
            } else {
                "collection of objects or references"
            }
        )));
    }
    let element = collection
        .target_name()
        .ok_or_else(|| fail(format!("elements of '{}' have no properties", def.collection)))?;
    let element = schema.container_by_name(element)?;

    let source_kind = match &def.source {
        Some(source) => {
            let handler = element.handler(source).ok_or_else(|| {
                fail(format!("unknown source property '{}.{}'", element.name(), source))
            })?;
            match handler.value_type() {
                ValueType::Scalar(k) => Some(*k),
                _ => {
                    return Err(fail(format!(
                        "source property '{}' must be a single scalar",
                        source
                    )))
                }
            }
        }
        None => None,
    };
    match (def.function, source_kind) {
        (AggregateFunction::Count, _) | (AggregateFunction::CountDistinct, Some(_)) => {
            if !receiving.is_numeric() {
                return Err(fail(format!("{} requires a numeric property", def.function)));
            }
        }
        (AggregateFunction::Min | AggregateFunction::Max, Some(source)) => {
            if source != receiving {
                return Err(fail(format!(
                    "{} of {} can't be stored in {}",
                    def.function, source, receiving
                )));
            }
        }
        (AggregateFunction::Sum | AggregateFunction::Avg, Some(source)) => {
            if !source.is_numeric() || !receiving.is_numeric() {
                return Err(fail(format!("{} requires numeric values", def.function)));
            }
        }
        (function, None) => {
            return Err(fail(format!("{} requires a source property", function)));
        }
    }

    let def = AggregateDef {
        function: def.function,
        collection: def.collection.clone(),
        source: def.source.clone(),
    };
    Ok(if dependent {
        HandlerKind::DependentAggregate(def)
    } else {
        HandlerKind::Aggregate(def)
    })
}

fn validate_container(container: &PropertiesContainer) -> Result<(), Error> {
    if container.is_persistent() && container.id_handler().is_none() {
        return Err(Error::schema_error(
            container.name(),
            "persistent resource without an identifier".to_owned(),
        ));
    }
    if (container.is_polymorphic() || container.is_concrete_variant())
        && container.discriminator().is_none()
    {
        return Err(Error::schema_error(
            container.name(),
            "polymorphic type without a discriminator".to_owned(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorType;
    use crate::schema::declaration::{AggregateDecl, StorageDecl};

    fn id() -> PropertyDecl {
        PropertyDecl::new("id", "long").with_kind(PropertyKindDecl::Id)
    }

    fn schema_error(builder: SchemaBuilder) -> Error {
        match builder.build() {
            Ok(_) => panic!("schema should not build"),
            Err(e) => e,
        }
    }

    #[test]
    fn persistent_resource_needs_an_id() {
        let e = schema_error(
            SchemaBuilder::new()
                .add_resource(ContainerDecl::new("User").with_property(PropertyDecl::new("name", "string"))),
        );
        assert_eq!(e.error_type, ErrorType::SchemaError);
        let mut transient = ContainerDecl::new("Report");
        transient.persistent = false;
        assert!(SchemaBuilder::new().add_resource(transient).build().is_ok());
    }

    #[test]
    fn second_id_is_rejected() {
        let e = schema_error(
            SchemaBuilder::new().add_resource(
                ContainerDecl::new("User")
                    .with_property(id())
                    .with_property(PropertyDecl::new("key", "string").with_kind(PropertyKindDecl::Id)),
            ),
        );
        assert!(e.message.contains("second identifier"));
    }

    #[test]
    fn references_resolve_in_any_order() -> Result<(), Error> {
        let schema = SchemaBuilder::new()
            .add_resource(
                ContainerDecl::new("Order")
                    .with_property(id())
                    .with_property(PropertyDecl::new("customer", "ref(User)")),
            )
            .add_resource(ContainerDecl::new("User").with_property(id()).with_property(
                {
                    let mut orders = PropertyDecl::new("orders", "list<ref(Order)>")
                        .with_kind(PropertyKindDecl::DependentReference);
                    orders.reverse = Some("customer".to_owned());
                    orders
                },
            ))
            .build()?;
        let orders = schema.resource("User")?.handler("orders").cloned();
        let orders = orders.ok_or_else(|| Error::general_error("missing".to_owned()))?;
        assert!(orders.is_reference());
        assert!(!orders.is_persisted());
        assert!(!orders.is_settable());
        Ok(())
    }

    #[test]
    fn dependent_reference_must_point_back() {
        let mut orders = PropertyDecl::new("orders", "list<ref(Order)>")
            .with_kind(PropertyKindDecl::DependentReference);
        orders.reverse = Some("title".to_owned());
        let e = schema_error(
            SchemaBuilder::new()
                .add_resource(
                    ContainerDecl::new("Order")
                        .with_property(id())
                        .with_property(PropertyDecl::new("title", "string")),
                )
                .add_resource(ContainerDecl::new("User").with_property(id()).with_property(orders)),
        );
        assert!(e.message.contains("must be a single reference"));
    }

    fn with_aggregate(function: AggregateFunction, source: Option<&str>, value_type: &str) -> SchemaBuilder {
        let mut total = PropertyDecl::new("total", value_type).with_kind(PropertyKindDecl::Aggregate);
        total.aggregate = Some(AggregateDecl {
            function,
            collection: "lines".to_owned(),
            source: source.map(|s| s.to_owned()),
        });
        SchemaBuilder::new()
            .add_object(
                ContainerDecl::new("Line")
                    .with_property(PropertyDecl::new("price", "decimal"))
                    .with_property(PropertyDecl::new("sku", "string")),
            )
            .add_resource(
                ContainerDecl::new("Invoice")
                    .with_property(id())
                    .with_property(PropertyDecl::new("lines", "list<object(Line)>"))
                    .with_property(total),
            )
    }

    #[test]
    fn aggregate_typing() {
        assert!(with_aggregate(AggregateFunction::Count, None, "long").build().is_ok());
        assert!(with_aggregate(AggregateFunction::Count, None, "string").build().is_err());
        assert!(with_aggregate(AggregateFunction::Sum, Some("price"), "decimal").build().is_ok());
        assert!(with_aggregate(AggregateFunction::Sum, Some("sku"), "decimal").build().is_err());
        assert!(with_aggregate(AggregateFunction::Max, Some("price"), "decimal").build().is_ok());
        assert!(with_aggregate(AggregateFunction::Max, Some("price"), "double").build().is_err());
        assert!(with_aggregate(AggregateFunction::Avg, None, "double").build().is_err());
        assert!(with_aggregate(AggregateFunction::CountDistinct, Some("sku"), "integer").build().is_ok());
    }

    #[test]
    fn counts_fit_any_numeric_property() {
        assert!(with_aggregate(AggregateFunction::Count, None, "double").build().is_ok());
        assert!(with_aggregate(AggregateFunction::Count, None, "decimal").build().is_ok());
        assert!(with_aggregate(AggregateFunction::CountDistinct, Some("sku"), "double").build().is_ok());
        let e = schema_error(with_aggregate(AggregateFunction::Count, None, "date"));
        assert!(e.message.contains("requires a numeric property"));
    }

    #[test]
    fn aggregate_must_be_nullable() {
        let mut builder = with_aggregate(AggregateFunction::Count, None, "long");
        builder.document.resources[0].properties[2].nullable = false;
        assert!(builder.build().is_err());
    }

    #[test]
    fn lazy_properties_must_be_nullable() {
        let mut bio = PropertyDecl::new("bio", "string");
        bio.fetched_by_default = false;
        bio.nullable = false;
        let e = schema_error(
            SchemaBuilder::new().add_resource(ContainerDecl::new("User").with_property(id()).with_property(bio)),
        );
        assert!(e.message.contains("must be nullable"));
    }

    #[test]
    fn separate_storage_needs_links() {
        let storage = |key: Option<&str>| StorageDecl {
            collection: "user_tags".to_owned(),
            parent_field: Some("user_id".to_owned()),
            key_field: key.map(|k| k.to_owned()),
        };
        let build = |t: &str, s: StorageDecl| {
            let mut tags = PropertyDecl::new("tags", t);
            tags.storage = Some(s);
            SchemaBuilder::new()
                .add_resource(ContainerDecl::new("User").with_property(id()).with_property(tags))
                .build()
        };
        assert!(build("list<string>", storage(None)).is_ok());
        assert!(build("map<string,string>", storage(None)).is_err());
        assert!(build("map<string,string>", storage(Some("name"))).is_ok());
        assert!(build("list<string>", storage(Some("name"))).is_err());
        let mut no_parent = storage(None);
        no_parent.parent_field = None;
        assert!(build("list<string>", no_parent).is_err());
        assert!(build("list<list<string>>", storage(None)).is_err());
    }

    #[test]
    fn variants_inherit_base_properties() -> Result<(), Error> {
        let doc = SchemaDocument::from_yaml(
            r#"
objects:
  - name: Payment
    discriminator: method
    properties:
      - name: amount
        type: decimal
    variants:
      - name: Card
        properties:
          - name: number
            type: string
      - name: Transfer
        properties:
          - name: iban
            type: string
"#,
        )?;
        let schema = Schema::from_document(doc)?;
        let payment = schema.container_by_name("Payment")?;
        assert!(payment.is_polymorphic());
        assert_eq!(payment.variant_tags(), vec!["Card", "Transfer"]);
        let card = schema.container_by_name("Card")?;
        assert_eq!(
            card.handlers().map(|h| h.name()).collect::<Vec<_>>(),
            vec!["method", "amount", "number"]
        );
        assert_eq!(card.variant_tag(), Some("Card"));
        assert_eq!(card.discriminator().map(|h| h.name()), Some("method"));
        Ok(())
    }

    #[test]
    fn references_parse_against_registry() -> Result<(), Error> {
        let schema = SchemaBuilder::new()
            .add_resource(ContainerDecl::new("User").with_property(id()))
            .build()?;
        let r = schema.parse_reference("User#42")?;
        assert_eq!(r, ResourceRef::new("User", 42i64));
        assert_eq!(schema.reference_to_text(&r)?, "User#42");
        assert!(schema.parse_reference("Group#1").is_err());
        assert!(schema.parse_reference("User#abc").is_err());
        Ok(())
    }

    #[test]
    fn embedding_a_resource_is_rejected() {
        let e = schema_error(
            SchemaBuilder::new()
                .add_resource(ContainerDecl::new("User").with_property(id()))
                .add_resource(
                    ContainerDecl::new("Team")
                        .with_property(id())
                        .with_property(PropertyDecl::new("lead", "object(User)")),
                ),
        );
        assert!(e.message.contains("use a reference"));
    }
}
