pub mod canonical;
pub mod data_source;
pub mod ids;
pub mod result;

pub use canonical::{
    date_value, datetime_value, CanonicalColumn, CanonicalType, QueryData, Row, DATETIME_FORMAT,
    DATE_FORMAT,
};
pub use data_source::{DataSource, SavedQuery, User};
pub use ids::{DataSourceId, JobId, QueryId, ResultId, UserId};
pub use result::QueryResult;
