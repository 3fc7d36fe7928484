use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::ledger::UserBalance;
use crate::model::{OrderNumber, OrderNumberError, UserId};

/// Errors that can occur when reading submissions or writing balances
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open {path}: {source}")]
    Open { path: String, source: csv::Error },

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: invalid order number: {source}")]
    InvalidOrder {
        line: usize,
        source: OrderNumberError,
    },

    #[error("failed to write balances: {0}")]
    Write(#[from] csv::Error),
}

#[derive(Debug, Deserialize)]
struct InputRow {
    user: UserId,
    order: String,
}

#[derive(Debug, Serialize)]
struct OutputRow {
    user: UserId,
    current: String,
    withdrawn: String,
}

/// Read `user,order` submissions from a csv file
pub fn read_submissions(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<(UserId, OrderNumber), CsvError>>, CsvError> {
    let path = path.as_ref();
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| CsvError::Open {
            path: path.display().to_string(),
            source,
        })?;

    Ok(reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            let order = OrderNumber::parse(&row.order)
                .map_err(|source| CsvError::InvalidOrder { line, source })?;
            Ok((row.user, order))
        }))
}

/// Write `user,current,withdrawn` rows in csv format
pub fn write_balances<W: io::Write>(
    out: W,
    balances: impl IntoIterator<Item = (UserId, UserBalance)>,
) -> Result<(), CsvError> {
    let mut writer = csv::Writer::from_writer(out);

    for (user, balance) in balances {
        let row = OutputRow {
            user,
            current: balance.current.to_string(),
            withdrawn: balance.withdrawn.to_string(),
        };
        writer.serialize(&row)?;
    }

    writer.flush().map_err(|e| CsvError::Write(e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Amount;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn read_submission() {
        let file = write_csv("user,order\n1,79927398713\n");
        let results: Vec<_> = read_submissions(file.path()).unwrap().collect();
        assert_eq!(results.len(), 1);

        let (user, order) = results.into_iter().next().unwrap().unwrap();
        assert_eq!(user, 1);
        assert_eq!(order.as_str(), "79927398713");
    }

    #[test]
    fn read_with_whitespace() {
        let file = write_csv("user, order\n 2 , 12345678903 \n");
        let results: Vec<_> = read_submissions(file.path()).unwrap().collect();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_ok());
    }

    #[test]
    fn read_returns_error_for_luhn_failure() {
        let file = write_csv("user,order\n1,79927398710\n1,79927398713\n");
        let results: Vec<_> = read_submissions(file.path()).unwrap().collect();
        assert_eq!(results.len(), 2);
        let err = results[0].as_ref().unwrap_err();
        assert!(matches!(
            err,
            CsvError::InvalidOrder {
                line: 2,
                source: OrderNumberError::Luhn(_)
            }
        ));
        assert!(results[1].is_ok());
    }

    #[test]
    fn read_returns_error_for_bad_user() {
        let file = write_csv("user,order\nalice,79927398713\n");
        let results: Vec<_> = read_submissions(file.path()).unwrap().collect();
        let err = results[0].as_ref().unwrap_err();
        assert!(matches!(err, CsvError::Parse { line: 2, .. }));
    }

    #[test]
    fn open_missing_file_fails() {
        let result = read_submissions("does/not/exist.csv");
        assert!(matches!(result, Err(CsvError::Open { .. })));
    }

    #[test]
    fn write_balances_as_csv() {
        let mut out = Vec::new();
        let balances = vec![
            (
                1,
                UserBalance {
                    current: Amount::from_parts(72_998, 2),
                    withdrawn: Amount::from_parts(500, 0),
                },
            ),
            (2, UserBalance::default()),
        ];
        write_balances(&mut out, balances).unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["user,current,withdrawn", "1,729.98,500", "2,0,0"]);
    }
}
