//! Covariates from a per-region CSV file.

use std::io::Read;
use std::path::Path;

use liveability_region_models::CovariateValue;

use crate::CovariateError;

/// Reads `fields` from the first record of the CSV at `path`.
///
/// # Errors
///
/// Returns [`CovariateError`] if the file cannot be opened or is not
/// valid CSV.
pub fn read_csv(path: &Path, fields: &[String]) -> Result<Vec<(String, CovariateValue)>, CovariateError> {
    let file = std::fs::File::open(path).map_err(|e| CovariateError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    log::info!("Reading covariates from {}", path.display());
    covariates_from_reader(file, fields, &path.display().to_string())
}

/// Reads `fields` from the first record of CSV data. `origin` names the
/// input in errors and warnings.
///
/// Missing columns, missing records and missing-data markers all yield
/// [`CovariateValue::Null`] with a warning.
///
/// # Errors
///
/// Returns [`CovariateError::Csv`] if the data is not valid CSV.
pub fn covariates_from_reader<R: Read>(
    reader: R,
    fields: &[String],
    origin: &str,
) -> Result<Vec<(String, CovariateValue)>, CovariateError> {
    let csv_error = |source| CovariateError::Csv {
        path: origin.to_string(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

    let headers: Vec<String> = reader
        .headers()
        .map_err(csv_error)?
        .iter()
        .map(|h| h.trim().to_owned())
        .collect();

    let record = reader.records().next().transpose().map_err(csv_error)?;
    if record.is_none() {
        log::warn!("{origin} has no records; covariates will be null");
    }

    Ok(fields
        .iter()
        .map(|field| {
            let Some(idx) = headers.iter().position(|h| h == field) else {
                log::warn!("{origin} has no `{field}` column; using null");
                return (field.clone(), CovariateValue::Null);
            };

            let value = record
                .as_ref()
                .and_then(|r| r.get(idx))
                .map_or(CovariateValue::Null, CovariateValue::parse);

            if value.is_null() {
                log::warn!("{origin}: `{field}` is missing; using null");
            }
            (field.clone(), value)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn reads_first_record_only() {
        let data = "city,E_EC2E_E15,climate\nTestville, 41.5 ,Cfb\nOther,1,Af\n";
        let values =
            covariates_from_reader(data.as_bytes(), &fields(&["E_EC2E_E15", "climate"]), "t.csv")
                .unwrap();
        assert_eq!(
            values,
            vec![
                ("E_EC2E_E15".to_string(), CovariateValue::Number(41.5)),
                ("climate".to_string(), CovariateValue::Text("Cfb".to_string())),
            ]
        );
    }

    #[test]
    fn markers_and_missing_columns_are_null() {
        let data = "a,b,c\nnan,,NA\n";
        let values =
            covariates_from_reader(data.as_bytes(), &fields(&["a", "b", "c", "d"]), "t.csv").unwrap();
        assert_eq!(values.len(), 4);
        assert!(values.iter().all(|(_, v)| v.is_null()));
        assert_eq!(values[3].0, "d");
    }

    #[test]
    fn short_rows_and_empty_files_are_null() {
        let values = covariates_from_reader("a,b\n1\n".as_bytes(), &fields(&["a", "b"]), "t.csv").unwrap();
        assert_eq!(values[0].1, CovariateValue::Number(1.0));
        assert!(values[1].1.is_null());

        let values = covariates_from_reader("a,b\n".as_bytes(), &fields(&["a"]), "t.csv").unwrap();
        assert!(values[0].1.is_null());
    }

    #[test]
    fn headers_are_trimmed() {
        let values = covariates_from_reader(" a , b \n1,2\n".as_bytes(), &fields(&["b"]), "t.csv").unwrap();
        assert_eq!(values[0].1, CovariateValue::Number(2.0));
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = read_csv(Path::new("/nonexistent/covariates.csv"), &fields(&["a"])).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/covariates.csv"));
    }
}
