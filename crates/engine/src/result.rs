use crate::error::StackError;

/// Records produced by an operation, plus the error that may have cut it short.
///
/// When `error()` is set the records are not authoritative.
#[derive(Debug, Clone)]
pub struct FetchResult<T> {
    records: Vec<T>,
    error: Option<StackError>,
}

impl<T> FetchResult<T> {
    pub fn ok(records: Vec<T>) -> Self {
        Self {
            records,
            error: None,
        }
    }

    pub fn single(record: T) -> Self {
        Self::ok(vec![record])
    }

    pub fn empty() -> Self {
        Self::ok(Vec::new())
    }

    pub fn failed(error: StackError) -> Self {
        Self {
            records: Vec::new(),
            error: Some(error),
        }
    }

    pub fn records(&self) -> &[T] {
        &self.records
    }

    pub fn first(&self) -> Option<&T> {
        self.records.first()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn error(&self) -> Option<&StackError> {
        self.error.as_ref()
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<Vec<T>, StackError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.records),
        }
    }

    pub fn into_records(self) -> Vec<T> {
        self.records
    }

    pub fn into_first(self) -> Option<T> {
        self.records.into_iter().next()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> FetchResult<U> {
        FetchResult {
            records: self.records.into_iter().map(f).collect(),
            error: self.error,
        }
    }
}

impl<T> From<Result<Vec<T>, StackError>> for FetchResult<T> {
    fn from(result: Result<Vec<T>, StackError>) -> Self {
        match result {
            Ok(records) => Self::ok(records),
            Err(error) => Self::failed(error),
        }
    }
}
