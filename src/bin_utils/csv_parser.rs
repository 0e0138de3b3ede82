use std::io::Read;

use csv::{DeserializeRecordsIntoIter, Trim};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Deposit,
    Withdraw,
    Transfer,
}

#[derive(Debug, Deserialize)]
pub struct RequestRow {
    pub request_id: String,
    #[serde(rename = "type")]
    pub kind: OperationKind,
    pub wallet: String,
    pub to_wallet: Option<String>,
    /// Kept as text until the ledger validates it.
    pub amount: String,
}

/// Parses a request list in CSV format, with the header
/// `request_id,type,wallet,to_wallet,amount`.
pub struct CsvRequestParser<R> {
    iter: DeserializeRecordsIntoIter<R, RequestRow>,
}

impl<R> CsvRequestParser<R>
where
    R: Read,
{
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .from_reader(source);

        Self {
            iter: reader.into_deserialize(),
        }
    }
}

impl<R> Iterator for CsvRequestParser<R>
where
    R: Read,
{
    type Item = (u64, csv::Result<RequestRow>);

    fn next(&mut self) -> Option<Self::Item> {
        let curr_line = self.iter.reader().position().line();
        self.iter.next().map(|row| (curr_line, row))
    }
}
