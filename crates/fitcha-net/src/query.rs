//! Row query description rendered as PostgREST URL parameters.

use std::fmt::Display;

/// A filtered, ordered selection against one table.
///
/// ```
/// use fitcha_net::Query;
///
/// let query = Query::table("notifications")
///     .eq("user_id", "u1")
///     .order("created_at", false)
///     .limit(20);
/// assert_eq!(query.table_name(), "notifications");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    table: String,
    columns: String,
    filters: Vec<(String, String)>,
    order: Option<(String, bool)>,
    limit: Option<u32>,
}

impl Query {
    pub fn table(table: &str) -> Self {
        Self {
            table: table.to_string(),
            columns: "*".to_string(),
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    /// Columns (and embedded joins) to return.
    pub fn select(mut self, columns: &str) -> Self {
        self.columns = columns.split_whitespace().collect::<Vec<_>>().join("");
        self
    }

    pub fn eq(self, column: &str, value: impl Display) -> Self {
        self.filter(column, format!("eq.{value}"))
    }

    pub fn neq(self, column: &str, value: impl Display) -> Self {
        self.filter(column, format!("neq.{value}"))
    }

    pub fn is_null(self, column: &str) -> Self {
        self.filter(column, "is.null".to_string())
    }

    fn filter(mut self, column: &str, expr: String) -> Self {
        self.filters.push((column.to_string(), expr));
        self
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.order = Some((column.to_string(), ascending));
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &str {
        &self.columns
    }

    pub fn filters(&self) -> &[(String, String)] {
        &self.filters
    }

    /// Value of the first filter on `column`, e.g. `"eq.42"`.
    pub fn filter_on(&self, column: &str) -> Option<&str> {
        self.filters
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, expr)| expr.as_str())
    }

    /// Full parameter list for a read.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![("select".to_string(), self.columns.clone())];
        params.extend(self.filters.iter().cloned());
        if let Some((column, ascending)) = &self.order {
            let direction = if *ascending { "asc" } else { "desc" };
            params.push(("order".to_string(), format!("{column}.{direction}")));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        params
    }

    /// Parameters for a write (`PATCH`/`DELETE`): filters plus the columns
    /// to return.
    pub fn to_write_params(&self) -> Vec<(String, String)> {
        let mut params = self.filters.clone();
        params.push(("select".to_string(), self.columns.clone()));
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_params() {
        let params = Query::table("notifications")
            .select("*, actor_profile:profiles!fk_notification_actor(first_name, last_name)")
            .eq("user_id", "u1")
            .order("created_at", false)
            .limit(20)
            .to_params();

        assert_eq!(
            params,
            vec![
                (
                    "select".to_string(),
                    "*,actor_profile:profiles!fk_notification_actor(first_name,last_name)".to_string()
                ),
                ("user_id".to_string(), "eq.u1".to_string()),
                ("order".to_string(), "created_at.desc".to_string()),
                ("limit".to_string(), "20".to_string()),
            ]
        );
    }

    #[test]
    fn test_write_params_and_lookup() {
        let query = Query::table("messages")
            .eq("conversation_id", "c1")
            .neq("sender_id", "u1")
            .eq("is_read", false);

        assert_eq!(query.filter_on("sender_id"), Some("neq.u1"));
        assert_eq!(query.filter_on("missing"), None);
        let params = query.to_write_params();
        assert_eq!(params.len(), 4);
        assert_eq!(params[2], ("is_read".to_string(), "eq.false".to_string()));
        assert_eq!(params[3], ("select".to_string(), "*".to_string()));
    }
}
