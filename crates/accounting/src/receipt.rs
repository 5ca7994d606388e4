//! Receipt attachments.
//!
//! A receipt is a stored file plus whatever fields an external OCR step
//! extracted from it. It never affects balances.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use ezbooks_core::{Aggregate, AggregateRoot, DomainError, TenantId};
use ezbooks_events::{Event, TenantScoped};

use crate::ids::{ReceiptId, TransactionId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptFile {
    pub url: String,
    pub storage_key: Option<String>,
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrLineItem {
    pub description: String,
    pub amount: Option<i64>,
}

/// Fields read off the receipt image. Amounts are in minor units.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrFields {
    pub merchant: Option<String>,
    pub amount: Option<i64>,
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub items: Vec<OcrLineItem>,
    pub tax: Option<i64>,
    pub tip: Option<i64>,
    pub confidence: Option<f64>,
}

/// Aggregate root: Receipt.
#[derive(Debug, Clone, PartialEq)]
pub struct Receipt {
    id: ReceiptId,
    tenant_id: Option<TenantId>,
    file: Option<ReceiptFile>,
    transaction_id: Option<TransactionId>,
    ocr: Option<OcrFields>,
    discarded: bool,
    version: u64,
    created: bool,
}

impl Receipt {
    pub fn empty(id: ReceiptId) -> Self {
        Self {
            id,
            tenant_id: None,
            file: None,
            transaction_id: None,
            ocr: None,
            discarded: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ReceiptId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn file(&self) -> Option<&ReceiptFile> {
        self.file.as_ref()
    }

    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.transaction_id
    }

    pub fn ocr(&self) -> Option<&OcrFields> {
        self.ocr.as_ref()
    }

    pub fn exists(&self) -> bool {
        self.created && !self.discarded
    }
}

impl AggregateRoot for Receipt {
    type Id = ReceiptId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureReceipt {
    pub tenant_id: TenantId,
    pub receipt_id: ReceiptId,
    pub file: ReceiptFile,
    pub transaction_id: Option<TransactionId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordOcr {
    pub tenant_id: TenantId,
    pub receipt_id: ReceiptId,
    pub fields: OcrFields,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkTransaction {
    pub tenant_id: TenantId,
    pub receipt_id: ReceiptId,
    pub transaction_id: TransactionId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscardReceipt {
    pub tenant_id: TenantId,
    pub receipt_id: ReceiptId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReceiptCommand {
    CaptureReceipt(CaptureReceipt),
    RecordOcr(RecordOcr),
    LinkTransaction(LinkTransaction),
    DiscardReceipt(DiscardReceipt),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptCaptured {
    pub tenant_id: TenantId,
    pub receipt_id: ReceiptId,
    pub file: ReceiptFile,
    pub transaction_id: Option<TransactionId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrRecorded {
    pub tenant_id: TenantId,
    pub receipt_id: ReceiptId,
    pub fields: OcrFields,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLinked {
    pub tenant_id: TenantId,
    pub receipt_id: ReceiptId,
    pub transaction_id: TransactionId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptDiscarded {
    pub tenant_id: TenantId,
    pub receipt_id: ReceiptId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReceiptEvent {
    ReceiptCaptured(ReceiptCaptured),
    OcrRecorded(OcrRecorded),
    ReceiptLinked(ReceiptLinked),
    ReceiptDiscarded(ReceiptDiscarded),
}

impl Event for ReceiptEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ReceiptEvent::ReceiptCaptured(_) => "accounting.receipt.captured",
            ReceiptEvent::OcrRecorded(_) => "accounting.receipt.ocr_recorded",
            ReceiptEvent::ReceiptLinked(_) => "accounting.receipt.linked",
            ReceiptEvent::ReceiptDiscarded(_) => "accounting.receipt.discarded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ReceiptEvent::ReceiptCaptured(e) => e.occurred_at,
            ReceiptEvent::OcrRecorded(e) => e.occurred_at,
            ReceiptEvent::ReceiptLinked(e) => e.occurred_at,
            ReceiptEvent::ReceiptDiscarded(e) => e.occurred_at,
        }
    }
}

impl TenantScoped for ReceiptEvent {
    fn tenant_id(&self) -> TenantId {
        match self {
            ReceiptEvent::ReceiptCaptured(e) => e.tenant_id,
            ReceiptEvent::OcrRecorded(e) => e.tenant_id,
            ReceiptEvent::ReceiptLinked(e) => e.tenant_id,
            ReceiptEvent::ReceiptDiscarded(e) => e.tenant_id,
        }
    }
}

impl Aggregate for Receipt {
    type Command = ReceiptCommand;
    type Event = ReceiptEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ReceiptEvent::ReceiptCaptured(e) => {
                self.id = e.receipt_id;
                self.tenant_id = Some(e.tenant_id);
                self.file = Some(e.file.clone());
                self.transaction_id = e.transaction_id;
                self.created = true;
            }
            ReceiptEvent::OcrRecorded(e) => {
                self.ocr = Some(e.fields.clone());
            }
            ReceiptEvent::ReceiptLinked(e) => {
                self.transaction_id = Some(e.transaction_id);
            }
            ReceiptEvent::ReceiptDiscarded(_) => {
                self.discarded = true;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ReceiptCommand::CaptureReceipt(cmd) => self.handle_capture(cmd),
            ReceiptCommand::RecordOcr(cmd) => self.handle_ocr(cmd),
            ReceiptCommand::LinkTransaction(cmd) => self.handle_link(cmd),
            ReceiptCommand::DiscardReceipt(cmd) => self.handle_discard(cmd),
        }
    }
}

impl Receipt {
    fn ensure_existing(&self, tenant_id: TenantId, receipt_id: ReceiptId) -> Result<(), DomainError> {
        if !self.exists() {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != receipt_id {
            return Err(DomainError::invariant("receipt_id mismatch"));
        }
        Ok(())
    }

    fn handle_capture(&self, cmd: &CaptureReceipt) -> Result<Vec<ReceiptEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("receipt already exists"));
        }
        if cmd.file.url.trim().is_empty() {
            return Err(DomainError::validation("receipt file url cannot be empty"));
        }
        if cmd.file.filename.trim().is_empty() {
            return Err(DomainError::validation("receipt filename cannot be empty"));
        }

        Ok(vec![ReceiptEvent::ReceiptCaptured(ReceiptCaptured {
            tenant_id: cmd.tenant_id,
            receipt_id: cmd.receipt_id,
            file: cmd.file.clone(),
            transaction_id: cmd.transaction_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_ocr(&self, cmd: &RecordOcr) -> Result<Vec<ReceiptEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.receipt_id)?;

        if let Some(c) = cmd.fields.confidence {
            if !(0.0..=1.0).contains(&c) {
                return Err(DomainError::validation("ocr confidence must be between 0 and 1"));
            }
        }

        Ok(vec![ReceiptEvent::OcrRecorded(OcrRecorded {
            tenant_id: cmd.tenant_id,
            receipt_id: cmd.receipt_id,
            fields: cmd.fields.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_link(&self, cmd: &LinkTransaction) -> Result<Vec<ReceiptEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.receipt_id)?;

        match self.transaction_id {
            Some(current) if current == cmd.transaction_id => Ok(vec![]),
            Some(_) => Err(DomainError::conflict(
                "receipt is already linked to another transaction",
            )),
            None => Ok(vec![ReceiptEvent::ReceiptLinked(ReceiptLinked {
                tenant_id: cmd.tenant_id,
                receipt_id: cmd.receipt_id,
                transaction_id: cmd.transaction_id,
                occurred_at: cmd.occurred_at,
            })]),
        }
    }

    fn handle_discard(&self, cmd: &DiscardReceipt) -> Result<Vec<ReceiptEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.receipt_id)?;

        Ok(vec![ReceiptEvent::ReceiptDiscarded(ReceiptDiscarded {
            tenant_id: cmd.tenant_id,
            receipt_id: cmd.receipt_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
