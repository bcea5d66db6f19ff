//! Persistence layer: keyed CBOR records in sled trees
//!
//! Templates and contracts live in separate named trees of one database.
//! Contract mutation goes through a compare-and-swap loop so concurrent
//! signers always observe a consistent snapshot; the record's `revision`
//! counter moves with every accepted write.

use std::sync::Arc;

use super::contract::SignedContract;
use super::error::SigningError;
use super::template::ContractTemplate;

const TEMPLATES_TREE: &str = "templates";
const CONTRACTS_TREE: &str = "contracts";

// How many times a lost CAS race is retried before giving up.
const MAX_CAS_ATTEMPTS: u32 = 16;

/// Offset/limit window for filtered scans.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

pub struct Store {
    templates: sled::Tree,
    contracts: sled::Tree,
}

impl Store {
    pub fn open(db: Arc<sled::Db>) -> anyhow::Result<Self> {
        Ok(Self {
            templates: db.open_tree(TEMPLATES_TREE)?,
            contracts: db.open_tree(CONTRACTS_TREE)?,
        })
    }

    pub fn get_template(&self, template_id: &str) -> anyhow::Result<Option<ContractTemplate>> {
        match self.templates.get(template_id.as_bytes())? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_template(&self, template: &ContractTemplate) -> anyhow::Result<()> {
        let bytes = minicbor::to_vec(template)?;
        self.templates
            .insert(template.template_id.as_bytes(), bytes)?;
        Ok(())
    }

    pub fn remove_template(&self, template_id: &str) -> anyhow::Result<()> {
        self.templates.remove(template_id.as_bytes())?;
        Ok(())
    }

    pub fn get_contract(&self, contract_id: &str) -> anyhow::Result<Option<SignedContract>> {
        match self.contracts.get(contract_id.as_bytes())? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// First write of a fresh contract record. Fails if the key exists.
    pub fn insert_contract(&self, contract: &SignedContract) -> anyhow::Result<()> {
        let bytes = minicbor::to_vec(contract)?;
        let prior = self
            .contracts
            .compare_and_swap(
                contract.contract_id.as_bytes(),
                None as Option<&[u8]>,
                Some(bytes),
            )?;
        if prior.is_err() {
            return Err(SigningError::PreconditionFailed {
                reason: format!("contract {} already exists", contract.contract_id),
            }
            .into());
        }
        Ok(())
    }

    /// Load-mutate-save under optimistic compare-and-swap. The closure may
    /// run more than once if a concurrent writer wins the race; it must not
    /// carry side effects of its own. A closure error aborts without writing.
    pub fn update_contract<R>(
        &self,
        contract_id: &str,
        mut apply: impl FnMut(&mut SignedContract) -> Result<R, SigningError>,
    ) -> anyhow::Result<R> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let Some(old_bytes) = self.contracts.get(contract_id.as_bytes())? else {
                return Err(SigningError::NotFound {
                    resource: "contract",
                    id: contract_id.to_string(),
                }
                .into());
            };

            let mut contract: SignedContract = minicbor::decode(&old_bytes)?;
            let result = apply(&mut contract)?;
            contract.revision += 1;

            let new_bytes = minicbor::to_vec(&contract)?;
            let swap = self.contracts.compare_and_swap(
                contract_id.as_bytes(),
                Some(&old_bytes[..]),
                Some(new_bytes),
            )?;

            if swap.is_ok() {
                return Ok(result);
            }
            // lost the race, reload and retry
        }

        Err(SigningError::UpdateConflict {
            id: contract_id.to_string(),
            attempts: MAX_CAS_ATTEMPTS,
        }
        .into())
    }

    pub fn list_templates(
        &self,
        filter: impl Fn(&ContractTemplate) -> bool,
        page: Page,
    ) -> anyhow::Result<Vec<ContractTemplate>> {
        let mut matched = Vec::new();
        let mut skipped = 0usize;

        for entry in self.templates.iter() {
            let (_, bytes) = entry?;
            let template: ContractTemplate = minicbor::decode(&bytes)?;
            if !filter(&template) {
                continue;
            }
            if skipped < page.offset {
                skipped += 1;
                continue;
            }
            matched.push(template);
            if matched.len() >= page.limit {
                break;
            }
        }

        Ok(matched)
    }

    pub fn list_contracts(
        &self,
        filter: impl Fn(&SignedContract) -> bool,
        page: Page,
    ) -> anyhow::Result<Vec<SignedContract>> {
        let mut matched = Vec::new();
        let mut skipped = 0usize;

        for entry in self.contracts.iter() {
            let (_, bytes) = entry?;
            let contract: SignedContract = minicbor::decode(&bytes)?;
            if !filter(&contract) {
                continue;
            }
            if skipped < page.offset {
                skipped += 1;
                continue;
            }
            matched.push(contract);
            if matched.len() >= page.limit {
                break;
            }
        }

        Ok(matched)
    }

    /// True when any stored contract references the template id. Gates hard
    /// deletion and template-version immutability.
    pub fn any_contract_references(&self, template_id: &str) -> anyhow::Result<bool> {
        for entry in self.contracts.iter() {
            let (_, bytes) = entry?;
            let contract: SignedContract = minicbor::decode(&bytes)?;
            if contract.template_id == template_id {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
