//! In-process fakes for the source ports.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use issnl_core::{
    CrossrefSource, DescriptionSource, IdentityError, Issn, JournalAliases, MappingPair,
    RegistrySource, Result,
};
use serde_json::Value;

pub fn issn(s: &str) -> Issn {
    s.parse().unwrap()
}

pub fn pair(identifier: &str, linking: &str) -> MappingPair {
    MappingPair::new(issn(identifier), issn(linking))
}

pub struct FakeRegistry(pub Vec<MappingPair>);

#[async_trait]
impl RegistrySource for FakeRegistry {
    async fn fetch_registry(&self) -> Result<Vec<MappingPair>> {
        Ok(self.0.clone())
    }
}

#[derive(Default)]
pub struct FakeCrossref {
    pub known: Vec<String>,
    pub aliases: HashMap<Issn, JournalAliases>,
    pub failing: HashSet<Issn>,
    pub lookups: Mutex<Vec<Issn>>,
}

impl FakeCrossref {
    pub fn with_known(known: &[&str]) -> Self {
        Self {
            known: known.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn alias(
        mut self,
        identifier: &str,
        aliases: &[&str],
        electronic: Option<&str>,
        print: Option<&str>,
    ) -> Self {
        self.aliases.insert(
            issn(identifier),
            JournalAliases {
                aliases: aliases.iter().map(|s| issn(s)).collect(),
                electronic: electronic.map(issn),
                print: print.map(issn),
            },
        );
        self
    }

    pub fn failing(mut self, identifier: &str) -> Self {
        self.failing.insert(issn(identifier));
        self
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.lock().unwrap().len()
    }
}

#[async_trait]
impl CrossrefSource for FakeCrossref {
    async fn fetch_known_identifiers(&self) -> Result<Vec<String>> {
        Ok(self.known.clone())
    }

    async fn lookup_aliases(&self, identifier: Issn) -> Result<Option<JournalAliases>> {
        self.lookups.lock().unwrap().push(identifier);
        if self.failing.contains(&identifier) {
            return Err(IdentityError::Download(format!("timeout for {identifier}")));
        }
        Ok(self.aliases.get(&identifier).cloned())
    }
}

#[derive(Default)]
pub struct FakeDescriptions {
    pub registry: HashMap<Issn, Value>,
    pub crossref: HashMap<Issn, Value>,
}

#[async_trait]
impl DescriptionSource for FakeDescriptions {
    async fn registry_description(&self, identifier: Issn) -> Result<Option<Value>> {
        Ok(self.registry.get(&identifier).cloned())
    }

    async fn crossref_description(&self, identifier: Issn) -> Result<Option<Value>> {
        Ok(self.crossref.get(&identifier).cloned())
    }
}
