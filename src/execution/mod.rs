//! Query execution module
//!
//! Collaborator traits, bundle assembly, row streaming and the ambient
//! concerns of a running query: progress, table status and locking.

mod bundle;
mod download;
mod lock;
mod manager;
mod progress;
mod services;
mod status;
mod stream;
mod token;

pub use bundle::{
    QueryBundleRequest, QueryOptions, QueryResult, QueryResultBundle, Row, RowSet, SumFileSizes,
    TableQuery, BUNDLE_MASK_LAST_UPDATED_ON, BUNDLE_MASK_QUERY_COLUMN_MODELS,
    BUNDLE_MASK_QUERY_COUNT, BUNDLE_MASK_QUERY_FACETS, BUNDLE_MASK_QUERY_MAX_ROWS_PER_PAGE,
    BUNDLE_MASK_QUERY_RESULTS, BUNDLE_MASK_QUERY_SELECT_COLUMNS, BUNDLE_MASK_SUM_FILE_SIZES,
};
pub use download::{DownloadRequest, DownloadResult, RowWriter};
pub use lock::{with_non_exclusive_lock, TableLockGuard, TableLockManager};
pub use manager::{QueryServices, TableQueryManager};
pub use progress::{CancellationFlag, ProgressContext, ProgressListener};
pub use services::{Authorizer, PrincipalId, RowIdAndVersion, TableIndex, ValueRow, ValueStream};
pub use status::{validate_table_is_available, TableState, TableStatus, TableStatusProvider};
pub use stream::RowStream;
pub use token::QueryNextPageToken;
