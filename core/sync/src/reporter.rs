//! Reporter stage: one log line per resolved item.

use futures::StreamExt;
use std::collections::HashSet;
use tracing::info;

use bucketsync_common::{ContentItem, Disposition};

use crate::pipeline::{ItemStream, Stage};

/// Logs `[create]   key` style lines for items with a chosen disposition.
#[derive(Debug, Clone, Default)]
pub struct Reporter {
    states: HashSet<Disposition>,
}

impl Reporter {
    /// Report only `states`. An empty set reports every disposition.
    pub fn new(states: impl IntoIterator<Item = Disposition>) -> Self {
        Self {
            states: states.into_iter().collect(),
        }
    }

    /// Whether an item with `disposition` is reported.
    pub fn reports(&self, disposition: Disposition) -> bool {
        self.states.is_empty() || self.states.contains(&disposition)
    }

    /// The line logged for `item`, if any.
    pub fn line(&self, item: &ContentItem) -> Option<String> {
        let disposition = item.disposition?;
        if !self.reports(disposition) {
            return None;
        }
        Some(format!("{:<10} {}", format!("[{}]", disposition), item.path))
    }
}

impl Stage for Reporter {
    fn apply(self, input: ItemStream) -> ItemStream {
        Box::pin(input.inspect(move |next| {
            if let Some(line) = next.as_ref().ok().and_then(|item| self.line(item)) {
                info!("{}", line);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::from_items;

    #[test]
    fn test_line_format() {
        let item = ContentItem::deleted("old/page.html");
        assert_eq!(Reporter::default().line(&item).unwrap(), "[delete]   old/page.html");
    }

    #[test]
    fn test_filter() {
        let reporter = Reporter::new([Disposition::Create]);
        let deleted = ContentItem::deleted("a");
        let unresolved = ContentItem::new("b", "b");

        assert!(reporter.line(&deleted).is_none());
        assert!(reporter.line(&unresolved).is_none());
        assert!(reporter.reports(Disposition::Create));
    }

    #[tokio::test]
    async fn test_stage_passes_items_through() {
        let items: Vec<_> = Reporter::default()
            .apply(from_items(vec![ContentItem::new("a", "1"), ContentItem::deleted("b")]))
            .collect()
            .await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[1].as_ref().unwrap().path, "b");
    }
}
