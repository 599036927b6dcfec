//! CSV seed files
//!
//! Seed files list the accounts a fresh store starts with, one per line:
//!
//! ```text
//! id,amount
//! 1,500.0
//! 2,300.0
//! ```

use crate::types::{Account, AccountId};
use csv::{ReaderBuilder, Trim};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// CSV record structure for deserialization
///
/// Matches the seed CSV format with columns: id, amount
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AccountRecord {
    pub id: AccountId,
    pub amount: f64,
}

/// Convert an AccountRecord to an Account
///
/// # Returns
///
/// Result containing either:
/// - Ok(Account) - The account to seed
/// - Err(String) - The amount is negative or not a finite number
pub fn convert_account_record(record: AccountRecord) -> Result<Account, String> {
    if !record.amount.is_finite() || record.amount < 0.0 {
        return Err(format!(
            "Invalid amount {} for account {}",
            record.amount, record.id
        ));
    }
    Ok(Account::new(record.id, record.amount))
}

/// Read seed accounts from a CSV file
///
/// # Arguments
///
/// * `path` - Path to the CSV file
///
/// # Errors
///
/// Returns a message naming the file, and the line for malformed rows,
/// invalid amounts and duplicate ids.
pub fn read_accounts_csv(path: &Path) -> Result<Vec<Account>, String> {
    let file = File::open(path)
        .map_err(|e| format!("Failed to open file '{}': {}", path.display(), e))?;
    parse_accounts(file).map_err(|e| format!("{}: {}", path.display(), e))
}

/// Parse seed accounts from any reader
pub fn parse_accounts<R: Read>(input: R) -> Result<Vec<Account>, String> {
    let mut reader = ReaderBuilder::new().trim(Trim::All).from_reader(input);
    let mut seen = HashSet::new();
    let mut accounts = Vec::new();

    for (index, row) in reader.deserialize::<AccountRecord>().enumerate() {
        // Line 1 is the header.
        let line = index + 2;
        let record = row.map_err(|e| format!("Line {}: CSV parse error: {}", line, e))?;
        let account =
            convert_account_record(record).map_err(|e| format!("Line {}: {}", line, e))?;
        if !seen.insert(account.account_id) {
            return Err(format!(
                "Line {}: Duplicate account {}",
                line, account.account_id
            ));
        }
        accounts.push(account);
    }

    Ok(accounts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Helper function to create a temporary CSV file for testing
    fn create_temp_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        file.write_all(content.as_bytes())
            .expect("Failed to write to temp file");
        file.flush().expect("Failed to flush temp file");
        file
    }

    #[test]
    fn test_read_accounts_csv() {
        let file = create_temp_csv("id,amount\n1,500.0\n 2 , 300 \n3,0\n");

        let accounts = read_accounts_csv(file.path()).unwrap();
        assert_eq!(
            accounts,
            vec![
                Account::new(1, 500.0),
                Account::new(2, 300.0),
                Account::new(3, 0.0)
            ]
        );
    }

    #[test]
    fn test_read_accounts_csv_missing_file() {
        let result = read_accounts_csv(Path::new("/nonexistent/seed.csv"));
        assert!(result.unwrap_err().starts_with("Failed to open file"));
    }

    #[test]
    fn test_header_only_is_empty() {
        assert_eq!(parse_accounts("id,amount\n".as_bytes()).unwrap(), vec![]);
    }

    #[rstest]
    #[case::not_a_number("id,amount\n1,10\n2,lots\n", "Line 3: CSV parse error")]
    #[case::missing_column("id,amount\n1\n", "Line 2: CSV parse error")]
    #[case::negative("id,amount\n1,-5\n", "Line 2: Invalid amount -5 for account 1")]
    #[case::infinite("id,amount\n1,inf\n", "Line 2: Invalid amount inf for account 1")]
    #[case::duplicate("id,amount\n1,10\n1,20\n", "Line 3: Duplicate account 1")]
    fn test_malformed_rows(#[case] input: &str, #[case] expected: &str) {
        let err = parse_accounts(input.as_bytes()).unwrap_err();
        assert!(err.starts_with(expected), "{}", err);
    }
}
