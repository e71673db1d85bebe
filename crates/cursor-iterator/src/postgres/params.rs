use std::fmt;
use tokio_postgres::types::ToSql;

/// An owned positional bind argument.
pub struct PgParam(Box<dyn ToSql + Sync + Send>);

impl PgParam {
    pub fn new<V>(value: V) -> Self
    where
        V: ToSql + Sync + Send + 'static,
    {
        PgParam(Box::new(value))
    }

    pub fn null() -> Self {
        PgParam(Box::new(Option::<String>::None))
    }
}

impl AsRef<dyn ToSql + Sync> for PgParam {
    fn as_ref(&self) -> &(dyn ToSql + Sync + 'static) {
        &*self.0
    }
}

impl fmt::Debug for PgParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

/// Bind arguments of the cursor query, kept for the iterator's lifetime.
#[derive(Debug, Default)]
pub struct PgParamStore {
    pub params: Vec<PgParam>,
}

impl PgParamStore {
    pub fn new(params: Vec<PgParam>) -> Self {
        Self { params }
    }

    pub fn push(&mut self, param: PgParam) {
        self.params.push(param);
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn as_refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params
            .iter()
            .map(|param| param.as_ref())
            .collect::<Vec<_>>()
    }
}

impl From<Vec<PgParam>> for PgParamStore {
    fn from(params: Vec<PgParam>) -> Self {
        Self::new(params)
    }
}
