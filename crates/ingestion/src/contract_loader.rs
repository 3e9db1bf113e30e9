//! Contract reference data loading.

use std::path::Path;
use ticksim_core::{ContractInfo, ContractTable, Error, Result};
use tracing::info;

/// Load a contract table from a CSV file.
///
/// Columns: `code,multiplier,margin_rate,open_fee_per_lot,open_fee_rate,`
/// `close_today_fee_per_lot,close_today_fee_rate`. Fee columns may be omitted.
pub fn load_contracts(path: impl AsRef<Path>) -> Result<ContractTable> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut table = ContractTable::new();
    for row in reader.deserialize::<ContractInfo>() {
        let info = row?;
        if info.multiplier <= 0.0 || info.margin_rate < 0.0 {
            return Err(Error::data(format!(
                "contract {} has invalid multiplier or margin rate",
                info.code
            )));
        }
        table.insert(info);
    }
    info!(path = %path.display(), contracts = table.len(), "loaded contract reference data");
    Ok(table)
}
