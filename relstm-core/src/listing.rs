//! Listings over machine instances.

use crate::definition::STATE_ALIAS;
use crate::error::CoreError;
use crate::identity::Identity;
use crate::machine::{state_string, RelationalMachine};
use crate::reference::Reference;
use relstm_query::{Row, SelectQuery};
use std::sync::Arc;

/// One listed instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingItem {
    pub id: Identity,
    pub state: String,
    pub properties: Row,
}

/// A prepared query over instances of one machine type.
///
/// The query is built once and may be executed any number of times.
pub struct Listing {
    machine: Arc<RelationalMachine>,
    query: SelectQuery,
}

impl Listing {
    pub(crate) fn new(machine: Arc<RelationalMachine>, query: SelectQuery) -> Self {
        Self { machine, query }
    }

    pub fn machine(&self) -> &Arc<RelationalMachine> {
        &self.machine
    }

    /// The underlying query, for inspection.
    pub fn query(&self) -> &SelectQuery {
        &self.query
    }

    /// Runs the query.
    pub fn execute(&self) -> Result<Vec<ListingItem>, CoreError> {
        let result = self.machine.backend().select(&self.query)?;
        result
            .rows()
            .map(|mut properties| {
                let state = properties
                    .remove(STATE_ALIAS)
                    .map(|v| state_string(&v))
                    .unwrap_or_default();
                let id = self.machine.identity_of_row(&properties)?;
                Ok(ListingItem {
                    id,
                    state,
                    properties,
                })
            })
            .collect()
    }

    /// Runs the query and returns loaded references.
    pub fn references(&self) -> Result<Vec<Reference>, CoreError> {
        Ok(self
            .execute()?
            .into_iter()
            .map(|item| {
                Reference::preloaded(
                    Arc::clone(&self.machine),
                    item.id,
                    item.state,
                    item.properties,
                )
            })
            .collect())
    }
}
