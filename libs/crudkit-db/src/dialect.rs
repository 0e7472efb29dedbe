//! SQL dialects.
//!
//! Each dialect renders through its sea-query builder, which owns
//! identifier quoting and clause spelling. The dialect adds the placeholder
//! template of its reference driver and the features the compiler branches on.

use sea_orm::sea_query::{MysqlQueryBuilder, PostgresQueryBuilder, QueryBuilder, SqliteQueryBuilder};

use crate::error::CrudError;
use crate::placeholder::PlaceholderStyle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Sqlite,
    Postgres,
    MySql,
}

impl Dialect {
    /// Pick the dialect from a DSN scheme.
    ///
    /// # Errors
    /// Returns [`CrudError::UnknownDatabase`] for any other scheme.
    pub fn from_dsn(dsn: &str) -> Result<Self, CrudError> {
        let scheme = dsn.split_once(':').map_or(dsn, |(s, _)| s);
        match scheme {
            "sqlite" => Ok(Self::Sqlite),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mysql" | "mariadb" => Ok(Self::MySql),
            other => Err(CrudError::UnknownDatabase(other.to_owned())),
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
        }
    }

    /// Placeholder template of the dialect's reference driver.
    #[must_use]
    pub fn placeholder_style(self) -> PlaceholderStyle {
        match self {
            Self::Sqlite => PlaceholderStyle::Question,
            Self::Postgres => PlaceholderStyle::Numbered,
            Self::MySql => PlaceholderStyle::Format,
        }
    }

    #[must_use]
    pub fn supports_returning(self) -> bool {
        !matches!(self, Self::MySql)
    }

    #[must_use]
    pub fn supports_ilike(self) -> bool {
        matches!(self, Self::Postgres)
    }

    /// Whether array values bind as native arrays rather than JSON text.
    #[must_use]
    pub fn native_arrays(self) -> bool {
        matches!(self, Self::Postgres)
    }

    pub(crate) fn query_builder(self) -> &'static dyn QueryBuilder {
        match self {
            Self::Sqlite => &SqliteQueryBuilder,
            Self::Postgres => &PostgresQueryBuilder,
            Self::MySql => &MysqlQueryBuilder,
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn dialect_from_dsn() {
        assert_eq!(Dialect::from_dsn("sqlite::memory:").unwrap(), Dialect::Sqlite);
        assert_eq!(Dialect::from_dsn("postgresql://u@h/db").unwrap(), Dialect::Postgres);
        assert_eq!(Dialect::from_dsn("mysql://u@h/db").unwrap(), Dialect::MySql);
        assert!(matches!(
            Dialect::from_dsn("oracle://h"),
            Err(CrudError::UnknownDatabase(s)) if s == "oracle"
        ));
    }
}
