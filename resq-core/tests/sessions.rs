use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use serde_json::json;

use resq_core::{
    compiler::QueryCompiler,
    config::CompilerConfig,
    error::{Error, ErrorType},
    instance::Instance,
    params::QueryParams,
    schema::{access::Principal, declaration::SchemaDocument, Schema},
    session::json::{JsonReadSession, JsonWriteSession},
    value::{ResourceRef, Value},
    value_type::ValueType,
};

fn shop() -> Result<Schema, Error> {
    Schema::from_document(SchemaDocument::from_yaml(include_str!("fixtures/shop.yaml"))?)
}

fn user() -> Instance {
    Instance::new("User")
        .with("id", 1i64)
        .with("name", "Ann")
        .with("status", Value::Enum("active".to_owned()))
        .with("age", 34)
        .with(
            "tags",
            Value::Map(vec![
                (Value::text("color"), Value::text("red")),
                (Value::text("size"), Value::text("m")),
            ]),
        )
        .with("labels", Value::Set(vec![Value::text("new"), Value::text("vip")]))
        .with(
            "roles",
            Value::List(vec![Value::Reference(ResourceRef::new("Role", "admin"))]),
        )
        .with(
            "address",
            Instance::new("Address").with("city", "Oslo").with("zip", "0150"),
        )
        .with(
            "payment",
            Instance::new("Card")
                .with("amount", Value::Decimal(Decimal::new(1250, 2)))
                .with("number", "4111"),
        )
        .with("manager", ResourceRef::new("User", 2i64))
}

fn write(schema: &Schema, value: &Value, session: JsonWriteSession) -> Result<serde_json::Value, Error> {
    let mut session = session;
    ValueType::object("User").write(value, schema, &mut session)?;
    session.finish()
}

#[test]
fn user_round_trip() -> Result<(), Error> {
    let schema = shop()?;
    let original = Value::Object(user());
    let document = write(&schema, &original, JsonWriteSession::new())?;
    assert_eq!(document["payment"]["method"], json!("Card"));
    assert_eq!(document["manager"], json!("User#2"));
    assert_eq!(document["tags"], json!({"color": "red", "size": "m"}));

    let mut session = JsonReadSession::new(document).with_identity_cache();
    let read = ValueType::object("User").read(&schema, &mut session)?;
    assert_eq!(read, original);
    Ok(())
}

#[test]
fn hidden_and_write_only_properties_are_not_written() -> Result<(), Error> {
    let schema = shop()?;
    let instance = user()
        .with("password", "secret")
        .with("salary", Value::Decimal(Decimal::new(5000, 0)));
    let value = Value::Object(instance);

    let anonymous = write(
        &schema,
        &value,
        JsonWriteSession::new().with_principal(Principal::anonymous()),
    )?;
    assert!(anonymous.get("salary").is_none());
    assert!(anonymous.get("password").is_none());

    let hr = write(
        &schema,
        &value,
        JsonWriteSession::new().with_principal(Principal::new("eve").with_role("hr")),
    )?;
    assert_eq!(hr["salary"], json!("5000"));
    assert!(hr.get("password").is_none());
    Ok(())
}

#[test]
fn projection_limits_written_properties() -> Result<(), Error> {
    let schema = shop()?;
    let compiler = QueryCompiler::new(&schema, CompilerConfig::default());
    let spec = compiler.compile("User", &QueryParams::parse("fields=name,address.city"))?;
    let document = write(
        &schema,
        &Value::Object(user()),
        JsonWriteSession::new().with_projection(spec.properties),
    )?;
    assert_eq!(document, json!({"name": "Ann", "address": {"city": "Oslo"}}));

    let spec = compiler.compile("User", &QueryParams::parse("fields=*,-address,-payment"))?;
    let document = write(
        &schema,
        &Value::Object(user().with("spent", Value::Decimal(Decimal::new(10, 0)))),
        JsonWriteSession::new().with_projection(spec.properties),
    )?;
    assert!(document.get("address").is_none());
    assert!(document.get("spent").is_none());
    assert_eq!(document["age"], json!(34));
    Ok(())
}

#[test]
fn nulls_can_be_skipped() -> Result<(), Error> {
    let schema = shop()?;
    let value = Value::Object(Instance::new("User").with("id", 3i64).with("email", Value::Null));
    assert_eq!(
        write(&schema, &value, JsonWriteSession::new())?,
        json!({"id": 3, "email": null})
    );
    assert_eq!(
        write(&schema, &value, JsonWriteSession::new().with_skip_nulls())?,
        json!({"id": 3})
    );
    Ok(())
}

#[test]
fn meta_and_computed_properties_are_ignored_on_input() -> Result<(), Error> {
    let schema = shop()?;
    let document = json!({
        "id": 5,
        "created": "2024-05-01T12:00:00Z",
        "order_count": 3,
        "extra": {"anything": [1, 2]}
    });
    let mut session = JsonReadSession::new(document);
    let read = ValueType::object("User").read(&schema, &mut session)?;
    let instance = read
        .as_object()
        .ok_or_else(|| Error::general_error("object expected".to_owned()))?;
    assert_eq!(instance.get("id"), Some(&Value::Long(5)));
    assert!(!instance.contains("created"));
    assert!(!instance.contains("order_count"));
    assert_eq!(instance.get("extra"), Some(&Value::Null));
    Ok(())
}

#[test]
fn invalid_input_is_rejected() -> Result<(), Error> {
    let schema = shop()?;
    let mut session = JsonReadSession::new(json!({"id": 1, "nickname": "x"}));
    let e = ValueType::object("User").read(&schema, &mut session).unwrap_err();
    assert_eq!(e.error_type, ErrorType::InvalidResourceData);

    let mut session = JsonReadSession::new(json!({"manager": "Role#admin"}));
    assert!(ValueType::object("User").read(&schema, &mut session).is_err());

    let mut session = JsonReadSession::new(json!({"salary": "10"}))
        .with_principal(Principal::new("bob"));
    let e = ValueType::object("User").read(&schema, &mut session).unwrap_err();
    assert_eq!(e.error_type, ErrorType::AccessDenied);
    Ok(())
}
