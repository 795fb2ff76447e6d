//! Turn an input (an uploaded CSV file, or update criteria) into a sequence of
//! bounded batch jobs, handing each job to a publisher as soon as it is cut.
mod criteria;
mod csv_file;

pub use criteria::CriteriaBatchProducer;
pub use csv_file::CsvBatchProducer;
