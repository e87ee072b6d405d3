//! Typed payloads stored in blocks, and the convenience producers that append
//! them to a [`Ledger`](crate::chain::Ledger).
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::chain::{ChainStore, Ledger};
use crate::constants::{BUILTIN_RECORD_TYPES, GENESIS_MARKER};
use crate::error::LedgerError;

/// A record held in a block. Serialized with a `type` discriminator.
///
/// Field order is fixed by the struct definitions and `serde_json::Value`
/// objects are key-sorted, so the same logical record always serializes to
/// the same bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Record {
    Genesis { marker: String },
    LeaseAgreement(LeaseRecord),
    VendorContract(VendorContractRecord),
    Payment(PaymentRecord),
    Document(DocumentRecord),
    Custom(CustomRecord),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub lease_id: String,
    pub property_id: String,
    pub tenant_id: String,
    pub start_date: String,
    pub end_date: String,
    /// Minor currency units.
    pub monthly_rent: u64,
    pub security_deposit: u64,
    /// Hex digest of the signed terms document.
    pub terms_hash: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorContractRecord {
    pub contract_id: String,
    pub vendor_id: String,
    pub property_id: String,
    pub service_type: String,
    pub amount: u64,
    pub start_date: String,
    pub end_date: String,
    pub terms_hash: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub payment_id: String,
    pub tenant_id: String,
    pub property_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_id: Option<String>,
    pub amount: u64,
    pub method: String,
    /// Processor-side transaction reference, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub document_id: String,
    pub document_type: String,
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
}

/// Free-form record for producers without a dedicated variant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomRecord {
    /// Audit discriminator reported by [`Record::record_type`].
    pub kind: String,
    #[serde(default)]
    pub entity_ids: Vec<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl CustomRecord {
    /// True when `kind` would pass for one of the built-in record types.
    pub fn has_reserved_kind(&self) -> bool {
        BUILTIN_RECORD_TYPES.contains(&self.kind.as_str())
    }
}

impl Record {
    pub fn genesis() -> Self {
        Record::Genesis {
            marker: GENESIS_MARKER.to_string(),
        }
    }

    pub fn is_genesis(&self) -> bool {
        matches!(self, Record::Genesis { .. })
    }

    /// The discriminator audit queries filter on.
    pub fn record_type(&self) -> &str {
        match self {
            Record::Genesis { .. } => "GENESIS",
            Record::LeaseAgreement(_) => "LEASE_AGREEMENT",
            Record::VendorContract(_) => "VENDOR_CONTRACT",
            Record::Payment(_) => "PAYMENT",
            Record::Document(_) => "DOCUMENT",
            Record::Custom(c) => &c.kind,
        }
    }

    /// Entity identifiers this record refers to.
    pub fn entity_refs(&self) -> Vec<&str> {
        match self {
            Record::Genesis { .. } => vec![],
            Record::LeaseAgreement(l) => vec![
                l.lease_id.as_str(),
                l.property_id.as_str(),
                l.tenant_id.as_str(),
            ],
            Record::VendorContract(v) => vec![
                v.contract_id.as_str(),
                v.vendor_id.as_str(),
                v.property_id.as_str(),
            ],
            Record::Payment(p) => {
                let mut refs = vec![
                    p.payment_id.as_str(),
                    p.tenant_id.as_str(),
                    p.property_id.as_str(),
                ];
                if let Some(lease) = &p.lease_id {
                    refs.push(lease);
                }
                refs
            }
            Record::Document(d) => {
                let mut refs = vec![d.document_id.as_str()];
                if let Some(entity) = &d.entity_id {
                    refs.push(entity);
                }
                refs
            }
            Record::Custom(c) => c.entity_ids.iter().map(String::as_str).collect(),
        }
    }

    pub fn references(&self, entity_id: &str) -> bool {
        self.entity_refs().contains(&entity_id)
    }

    /// Bytes fed to the block digest.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, LedgerError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Result of a producer call: where the record landed and whether it verified.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordReceipt {
    pub index: u64,
    pub hash: String,
    pub verified: bool,
}

impl<S: ChainStore> Ledger<S> {
    pub fn record_lease(&self, lease: LeaseRecord) -> Result<RecordReceipt, LedgerError> {
        self.record(Record::LeaseAgreement(lease))
    }

    pub fn record_vendor_contract(
        &self,
        contract: VendorContractRecord,
    ) -> Result<RecordReceipt, LedgerError> {
        self.record(Record::VendorContract(contract))
    }

    pub fn record_payment(&self, payment: PaymentRecord) -> Result<RecordReceipt, LedgerError> {
        self.record(Record::Payment(payment))
    }

    pub fn record_document(&self, document: DocumentRecord) -> Result<RecordReceipt, LedgerError> {
        self.record(Record::Document(document))
    }

    fn record(&self, record: Record) -> Result<RecordReceipt, LedgerError> {
        let kind = record.record_type().to_string();
        let block = self.add_block(record)?;
        let verified = self.verify_block(&block.hash)?;
        info!(index = block.index, kind = %kind, verified, "record stored");
        Ok(RecordReceipt {
            index: block.index,
            hash: block.hash,
            verified,
        })
    }
}
