//! Double-entry bookkeeping domain (event-sourced).
//!
//! Pure domain logic only: no IO, no HTTP, no persistence concerns.

pub mod account;
pub mod entry;
pub mod ids;
pub mod ledger;
pub mod proposal;
pub mod receipt;
pub mod transaction;

pub use account::{
    Account, AccountArchived, AccountCommand, AccountEvent, AccountKind, AccountOpened,
    AccountRenamed, ArchiveAccount, BalanceSynced, ExternalAccountLinked, LinkExternalAccount,
    OpenAccount, RenameAccount, SyncBalance,
};
pub use entry::{EntryHeader, EntryLine, EntrySide, EntrySource, FinalEntry};
pub use ids::{AccountId, LedgerId, ReceiptId, TransactionId};
pub use ledger::{Ledger, LedgerCommand, LedgerEvent, ManualEntryPosted, PostManualEntry};
pub use proposal::{
    AlternativeEntry, ProposalEdits, ProposalSource, ProposalStatus, ProposedEntry, Suggestion,
};
pub use receipt::{
    CaptureReceipt, DiscardReceipt, LinkTransaction, OcrFields, OcrLineItem, OcrRecorded, Receipt,
    ReceiptCaptured, ReceiptCommand, ReceiptDiscarded, ReceiptEvent, ReceiptFile, ReceiptLinked,
    RecordOcr,
};
pub use transaction::{
    ApproveEntry, AttachReceipt, CorrectTransaction, DeleteTransaction, EntryApproved,
    EntryProposed, EntryRejected, EntryRevised, MarkRemoved, ProposeEntry, ReceiptAttached,
    RecordTransaction, RejectEntry, StatusTimestamps, Transaction, TransactionChanges,
    TransactionCommand, TransactionCorrected, TransactionDeleted, TransactionDetails,
    TransactionEvent, TransactionRecorded, TransactionRemoved, TransactionSource,
    TransactionStatus,
};

/// Aggregate type names used as stream discriminators in the event store.
pub mod aggregate_types {
    pub const ACCOUNT: &str = "accounting.account";
    pub const TRANSACTION: &str = "accounting.transaction";
    pub const LEDGER: &str = "accounting.ledger";
    pub const RECEIPT: &str = "accounting.receipt";
}
