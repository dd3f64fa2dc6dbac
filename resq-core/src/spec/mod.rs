//! Specification model.
//!
//! The four specifications compiled from a request describe what a backend fetches:
//! [filter::FilterSpec] selects records, [order::OrderSpec] sorts them,
//! [properties::PropertiesFetchSpec] selects the returned properties and
//! [references::ReferencesFetchSpec] lists references resolved next to the result.
//! [FetchSpec] bundles them with the requested range.
//!
//! All paths inside the specifications are resolved against the schema when they
//! are added, so a specification that exists is valid.

use std::collections::BTreeMap;

use crate::config::CompilerConfig;
use crate::error::Error;
use crate::params::QueryParams;
use crate::schema::Schema;

pub mod filter;
pub mod order;
pub mod properties;
pub mod references;

use filter::FilterSpec;
use order::OrderSpec;
use properties::PropertiesFetchSpec;
use references::ReferencesFetchSpec;

/// Window of the result: `count` records starting at `first` (zero based)
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub first: u64,
    pub count: u64,
}

impl Range {
    pub fn new(first: u64, count: u64) -> Self {
        Range { first, count }
    }

    pub fn encode(&self) -> String {
        format!("{},{}", self.first, self.count)
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct FetchSpec {
    pub resource_type: String,
    pub filter: FilterSpec,
    /// Filters declared for segmentation and aggregate scoping, by key
    pub additional_filters: BTreeMap<String, FilterSpec>,
    pub order: OrderSpec,
    pub properties: PropertiesFetchSpec,
    pub references: ReferencesFetchSpec,
    /// Without a range all matching records are returned and the total is their count
    pub range: Option<Range>,
}

impl FetchSpec {
    /// Unrestricted fetch of all records of a resource type
    pub fn new(schema: &Schema, resource_type: &str) -> Result<Self, Error> {
        let resource_type = schema.resource(resource_type)?.name().to_owned();
        Ok(FetchSpec {
            filter: FilterSpec::new(schema, &resource_type)?,
            additional_filters: BTreeMap::new(),
            order: OrderSpec::new(schema, &resource_type)?,
            properties: PropertiesFetchSpec::new(schema, &resource_type)?,
            references: ReferencesFetchSpec::new(schema, &resource_type)?,
            range: None,
            resource_type,
        })
    }

    /// Render the specification as request parameters.
    /// Compiling the result yields an equivalent specification.
    pub fn encode_params(&self, config: &CompilerConfig) -> Result<QueryParams, Error> {
        let mut params = QueryParams::new();
        for (name, value) in self.filter.encode_params(&config.filter_key)? {
            params.add(name, value);
        }
        for (key, filter) in self.additional_filters.iter() {
            for (name, value) in filter.encode_params(key)? {
                params.add(name, value);
            }
        }
        if !self.order.is_empty() {
            params.add(config.order_param.as_str(), self.order.encode());
        }
        if !self.properties.is_empty() {
            params.add(config.properties_param.as_str(), self.properties.encode());
        }
        if !self.references.is_empty() {
            params.add(config.references_param.as_str(), self.references.encode());
        }
        if let Some(range) = &self.range {
            params.add(config.range_param.as_str(), range.encode());
        }
        Ok(params)
    }
}
