//! Common predicates over node views

use std::collections::BTreeSet;

use crate::models::{NodeStatus, NodeView};

pub fn all() -> impl Fn(&NodeView) -> bool {
    |_| true
}

pub fn in_group(group: impl Into<String>) -> impl Fn(&NodeView) -> bool {
    let group = group.into();
    move |view| view.group == group
}

pub fn with_tag(tag: impl Into<String>) -> impl Fn(&NodeView) -> bool {
    let tag = tag.into();
    move |view| view.tags.contains(&tag)
}

pub fn with_ids<I, S>(ids: I) -> impl Fn(&NodeView) -> bool
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let ids: BTreeSet<String> = ids.into_iter().map(Into::into).collect();
    move |view| ids.contains(&view.id)
}

pub fn with_status(status: NodeStatus) -> impl Fn(&NodeView) -> bool {
    move |view| view.status == status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BackendNode, MetadataRecord, NodeOptions};

    fn view(id: &str, group: &str, tag: &str) -> NodeView {
        MetadataRecord::new(group, &NodeOptions::new().tag(tag)).to_view(&BackendNode::new(id, "pool"))
    }

    #[test]
    fn test_predicates() {
        let v = view("n-1", "g1", "web");

        assert!(all()(&v));
        assert!(in_group("g1")(&v));
        assert!(!in_group("g2")(&v));
        assert!(with_tag("web")(&v));
        assert!(!with_tag("db")(&v));
        assert!(with_ids(["n-1"])(&v));
        assert!(!with_ids(["n-2"])(&v));
        assert!(with_status(NodeStatus::Running)(&v));
    }
}
