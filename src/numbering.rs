//! Human-readable document numbers, sequenced per kind and calendar year
use super::error::WorkflowError;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionalTree,
};
use std::fmt;

/// Highest sequence value a (kind, year) pair can hand out.
pub const MAX_SEQUENCE: u64 = 99_999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DocumentKind {
    WorkOrder,
    Invoice,
}

impl DocumentKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            DocumentKind::WorkOrder => "WO",
            DocumentKind::Invoice => "INV",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "WO" => Some(DocumentKind::WorkOrder),
            "INV" => Some(DocumentKind::Invoice),
            _ => None,
        }
    }

    fn counter_key(&self, year: i32) -> String {
        format!("{}/{year:04}", self.prefix())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentNumber {
    pub kind: DocumentKind,
    pub year: i32,
    pub sequence: u64,
}

impl fmt::Display for DocumentNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{:04}-{:05}",
            self.kind.prefix(),
            self.year,
            self.sequence
        )
    }
}

pub fn format_number(kind: DocumentKind, year: i32, sequence: u64) -> String {
    DocumentNumber {
        kind,
        year,
        sequence,
    }
    .to_string()
}

/// Accepts `PREFIX-YYYY-NNNNN` with exactly four year digits and five sequence digits.
pub fn parse_document_number(number: &str) -> Result<DocumentNumber, WorkflowError> {
    let malformed = || WorkflowError::invalid(format!("'{number}' is not a document number"));
    let all_digits = |s: &str, len: usize| s.len() == len && s.bytes().all(|b| b.is_ascii_digit());

    let mut parts = number.split('-');
    let (Some(prefix), Some(year), Some(seq), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(malformed());
    };
    let kind = DocumentKind::from_prefix(prefix).ok_or_else(malformed)?;
    if !all_digits(year, 4) || !all_digits(seq, 5) {
        return Err(malformed());
    }
    let year = year.parse().map_err(|_| malformed())?;
    let sequence: u64 = seq.parse().map_err(|_| malformed())?;
    if sequence == 0 {
        return Err(malformed());
    }

    Ok(DocumentNumber {
        kind,
        year,
        sequence,
    })
}

/// The value following `current`, refusing to pass [`MAX_SEQUENCE`].
pub fn next_sequence(
    kind: DocumentKind,
    year: i32,
    current: Option<u64>,
) -> Result<u64, WorkflowError> {
    let next = current.unwrap_or(0) + 1;
    if next > MAX_SEQUENCE {
        return Err(WorkflowError::ExhaustedSequence {
            prefix: kind.prefix(),
            year,
        });
    }
    Ok(next)
}

fn decode_counter(raw: Option<sled::IVec>) -> Result<Option<u64>, WorkflowError> {
    raw.map(|bytes| {
        let arr: [u8; 8] = bytes
            .as_ref()
            .try_into()
            .map_err(|_| WorkflowError::Codec("sequence counter is not 8 bytes".into()))?;
        Ok(u64::from_be_bytes(arr))
    })
    .transpose()
}

/// Allocate inside an enclosing transaction so the number commits or vanishes with it.
pub(crate) fn allocate_in(
    sequences: &TransactionalTree,
    kind: DocumentKind,
    year: i32,
) -> ConflictableTransactionResult<String, WorkflowError> {
    let key = kind.counter_key(year);
    let current =
        decode_counter(sequences.get(key.as_bytes())?).map_err(ConflictableTransactionError::Abort)?;
    let next = next_sequence(kind, year, current).map_err(ConflictableTransactionError::Abort)?;
    sequences.insert(key.as_bytes(), next.to_be_bytes().to_vec())?;

    Ok(format_number(kind, year, next))
}

pub(crate) fn unwrap_tx_error(err: TransactionError<WorkflowError>) -> WorkflowError {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => WorkflowError::Storage(e),
    }
}

/// Standalone allocator over the `sequences` tree.
#[derive(Clone)]
pub struct Numbering {
    sequences: sled::Tree,
}

impl Numbering {
    pub fn new(sequences: sled::Tree) -> Self {
        Self { sequences }
    }

    pub fn next_number(&self, kind: DocumentKind, year: i32) -> Result<String, WorkflowError> {
        let number = self
            .sequences
            .transaction(|tx| allocate_in(tx, kind, year))
            .map_err(unwrap_tx_error)?;
        tracing::debug!(%number, "allocated document number");
        Ok(number)
    }

    /// Last value handed out for the pair, if any.
    pub fn current(&self, kind: DocumentKind, year: i32) -> Result<Option<u64>, WorkflowError> {
        decode_counter(self.sequences.get(kind.counter_key(year).as_bytes())?)
    }
}
