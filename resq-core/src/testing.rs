//! Fixtures shared by unit tests.

use crate::schema::declaration::SchemaDocument;
use crate::schema::Schema;

pub const SHOP: &str = include_str!("../tests/fixtures/shop.yaml");

pub fn shop() -> Schema {
    let document = SchemaDocument::from_yaml(SHOP).expect("fixture document parses");
    Schema::from_document(document).expect("fixture schema builds")
}
