// src/table/years.rs

use arrow::{
    array::{Array, BooleanArray, Int64Array},
    compute,
    record_batch::RecordBatch,
};
use std::collections::BTreeSet;
use tracing::{debug, warn};

use super::Dataset;
use crate::error::{NoDataSnafu, PageError, PageResult};

/// The rows of one year that carry a value for the measure of interest.
#[derive(Debug, Clone, PartialEq)]
pub struct YearSlice {
    pub year: i64,
    pub value_column: String,
    pub batch: RecordBatch,
}

impl YearSlice {
    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    /// View the slice as a dataset, for the scene builders.
    pub fn as_dataset(&self, source_id: &str) -> Dataset {
        Dataset::new(source_id, self.batch.clone())
    }
}

/// Year Index plus slicing over one long-format dataset.
#[derive(Debug, Clone)]
pub struct YearFilter {
    dataset: Dataset,
    year_column: String,
    value_column: String,
    years: Vec<i64>,
}

impl YearFilter {
    /// Build the Year Index: distinct years among rows where both the year
    /// and the value are present, newest first.
    pub fn new(dataset: Dataset, year_column: &str, value_column: &str) -> PageResult<Self> {
        let years = {
            let (year_arr, value_arr) = Self::columns(&dataset, year_column, value_column)?;
            let mut set = BTreeSet::new();
            for row in 0..year_arr.len() {
                if year_arr.is_valid(row) && value_arr.is_valid(row) {
                    set.insert(year_arr.value(row));
                }
            }
            set.into_iter().rev().collect::<Vec<_>>()
        };

        if years.is_empty() {
            warn!(source = %dataset.source_id, year_column, value_column, "no valid years");
            return NoDataSnafu {
                source_id: dataset.source_id.clone(),
            }
            .fail();
        }
        debug!(source = %dataset.source_id, years = years.len(), "built year index");

        Ok(Self {
            dataset,
            year_column: year_column.to_string(),
            value_column: value_column.to_string(),
            years,
        })
    }

    fn columns<'a>(
        dataset: &'a Dataset,
        year_column: &str,
        value_column: &str,
    ) -> PageResult<(&'a Int64Array, &'a dyn Array)> {
        let year_arr = dataset
            .column(year_column)?
            .as_any()
            .downcast_ref::<Int64Array>()
            .ok_or_else(|| PageError::DataUnavailable {
                source_id: dataset.source_id.clone(),
                reason: format!("column `{}` is not a year column", year_column),
            })?;
        let value_arr = dataset.column(value_column)?.as_ref();
        Ok((year_arr, value_arr))
    }

    /// Descending, de-duplicated, never empty.
    pub fn index(&self) -> &[i64] {
        &self.years
    }

    pub fn latest(&self) -> i64 {
        self.years[0]
    }

    pub fn contains(&self, year: i64) -> bool {
        self.years.contains(&year)
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Rows with `year` and a non-null value. Years outside the index give an empty slice.
    pub fn slice(&self, year: i64) -> PageResult<YearSlice> {
        let (year_arr, value_arr) =
            Self::columns(&self.dataset, &self.year_column, &self.value_column)?;
        let mask: BooleanArray = (0..year_arr.len())
            .map(|row| {
                Some(year_arr.is_valid(row) && year_arr.value(row) == year && value_arr.is_valid(row))
            })
            .collect();

        let batch = compute::filter_record_batch(&self.dataset.batch, &mask).map_err(|e| {
            PageError::Unclassified {
                message: format!("filtering {} for {}: {}", self.dataset.source_id, year, e),
            }
        })?;
        debug!(year, rows = batch.num_rows(), "sliced year");

        Ok(YearSlice {
            year,
            value_column: self.value_column.clone(),
            batch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::load::parse_csv;
    use crate::table::types::ColumnSpec;

    fn dataset(csv: &str) -> Dataset {
        parse_csv(
            "t.csv",
            csv.as_bytes(),
            0,
            &[ColumnSpec::year("year"), ColumnSpec::number("value")],
        )
        .unwrap()
    }

    #[test]
    fn year_retained_when_any_row_has_a_value() {
        let ds = dataset("id,year,value\na,2020,5\nb,2020,\nc,2019,3\n");
        let filter = YearFilter::new(ds, "year", "value").unwrap();
        assert_eq!(filter.index(), &[2020, 2019]);
        assert_eq!(filter.latest(), 2020);

        let slice = filter.slice(2020).unwrap();
        assert_eq!(slice.num_rows(), 1);
    }

    #[test]
    fn index_is_strictly_descending_without_bad_years() {
        let ds = dataset("id,year,value\na,1999,1\nb,oops,1\nc,2005,2\nd,1999,3\ne,2001.0,4\nf,1980,\n");
        let filter = YearFilter::new(ds, "year", "value").unwrap();
        let idx = filter.index();
        assert_eq!(idx, &[2005, 2001, 1999]);
        assert!(idx.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn absent_year_gives_empty_slice() {
        let ds = dataset("id,year,value\na,2020,5\n");
        let filter = YearFilter::new(ds, "year", "value").unwrap();
        let slice = filter.slice(1800).unwrap();
        assert!(slice.is_empty());
        assert_eq!(slice.year, 1800);
    }

    #[test]
    fn no_valid_years_is_no_data() {
        let ds = dataset("id,year,value\na,2020,\nb,x,3\n");
        let err = YearFilter::new(ds, "year", "value").unwrap_err();
        assert!(matches!(err, PageError::NoData { .. }));
    }

    #[test]
    fn unknown_value_column() {
        let ds = dataset("id,year,value\na,2020,5\n");
        let err = YearFilter::new(ds, "year", "gdp").unwrap_err();
        assert_eq!(
            err,
            PageError::UnknownColumn {
                column: "gdp".into()
            }
        );
    }
}
