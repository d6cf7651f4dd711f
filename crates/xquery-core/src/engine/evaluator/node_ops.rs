use crate::compiler::ir::Axis;
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::XdmNode;
use crate::xdm::{XdmItem, XdmSequence};
use core::cmp::Ordering;

/// Nodes on `axis` in axis order: reverse axes start next to `node`.
pub(super) fn axis_nodes<N: XdmNode>(node: &N, axis: Axis) -> Vec<N> {
    match axis {
        Axis::Child => node.children(),
        Axis::Attribute => node.attributes(),
        Axis::SelfAxis => vec![node.clone()],
        Axis::Descendant => descendants(node, false),
        Axis::DescendantOrSelf => descendants(node, true),
        Axis::Parent => node.parent().into_iter().collect(),
        Axis::Ancestor => ancestors(node, false),
        Axis::AncestorOrSelf => ancestors(node, true),
        Axis::FollowingSibling => {
            let (_, after) = siblings(node);
            after
        }
        Axis::PrecedingSibling => {
            let (mut before, _) = siblings(node);
            before.reverse();
            before
        }
    }
}

fn descendants<N: XdmNode>(node: &N, include_self: bool) -> Vec<N> {
    let mut out = Vec::new();
    if include_self {
        out.push(node.clone());
    }
    let mut stack: Vec<N> = node.children().into_iter().rev().collect();
    while let Some(n) = stack.pop() {
        stack.extend(n.children().into_iter().rev());
        out.push(n);
    }
    out
}

fn ancestors<N: XdmNode>(node: &N, include_self: bool) -> Vec<N> {
    let mut out = Vec::new();
    if include_self {
        out.push(node.clone());
    }
    let mut cur = node.parent();
    while let Some(p) = cur {
        cur = p.parent();
        out.push(p);
    }
    out
}

/// Siblings before and after `node`, both in document order. Attributes and
/// namespaces have no siblings.
fn siblings<N: XdmNode>(node: &N) -> (Vec<N>, Vec<N>) {
    let Some(parent) = node.parent() else {
        return (Vec::new(), Vec::new());
    };
    let mut children = parent.children();
    match children.iter().position(|c| c == node) {
        Some(i) => {
            let after = children.split_off(i + 1);
            children.truncate(i);
            (children, after)
        }
        None => (Vec::new(), Vec::new()),
    }
}

/// Sorts a path result into document order and removes duplicate nodes.
/// Sequences of atomic values are returned unchanged.
pub(super) fn document_order<N: XdmNode>(items: XdmSequence<N>) -> Result<XdmSequence<N>, Error> {
    let nodes = items.iter().filter(|i| matches!(i, XdmItem::Node(_))).count();
    if nodes == 0 {
        return Ok(items);
    }
    if nodes != items.len() {
        return Err(Error::from_code(ErrorCode::XPTY0004, "path result mixes nodes and non-node items"));
    }
    let mut nodes: Vec<N> = items
        .into_iter()
        .filter_map(|i| match i {
            XdmItem::Node(n) => Some(n),
            _ => None,
        })
        .collect();
    let mut failure = None;
    nodes.sort_by(|a, b| {
        a.compare_document_order(b).unwrap_or_else(|err| {
            failure.get_or_insert(err);
            Ordering::Equal
        })
    });
    if let Some(err) = failure {
        return Err(err);
    }
    nodes.dedup();
    Ok(nodes.into_iter().map(XdmItem::Node).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simple_node::{SimpleNode, attr, doc, elem};

    fn tree() -> SimpleNode {
        doc()
            .child(elem("r").attr(attr("id", "1")).child(elem("a")).child(elem("b").child(elem("c"))).child(elem("d")))
            .build()
    }

    fn names(nodes: &[SimpleNode]) -> Vec<String> {
        nodes.iter().filter_map(|n| n.name().map(|q| q.local)).collect()
    }

    #[test]
    fn descendant_axis_is_preorder() {
        let d = tree();
        assert_eq!(names(&axis_nodes(&d, Axis::Descendant)), ["r", "a", "b", "c", "d"]);
    }

    #[test]
    fn reverse_axes_start_near() {
        let d = tree();
        let c = axis_nodes(&d, Axis::Descendant).into_iter().find(|n| n.name().is_some_and(|q| q.local == "c"));
        let Some(c) = c else { panic!("missing c") };
        assert_eq!(names(&axis_nodes(&c, Axis::Ancestor)), ["b", "r"]);
        let Some(b) = c.parent() else { panic!("missing b") };
        assert_eq!(names(&axis_nodes(&b, Axis::PrecedingSibling)), ["a"]);
        assert_eq!(names(&axis_nodes(&b, Axis::FollowingSibling)), ["d"]);
    }

    #[test]
    fn document_order_sorts_and_dedupes() -> Result<(), Error> {
        let d = tree();
        let all = axis_nodes(&d, Axis::Descendant);
        let mut items: XdmSequence<SimpleNode> = all.iter().rev().cloned().map(XdmItem::Node).collect();
        items.push(XdmItem::Node(all[0].clone()));
        let sorted = document_order(items)?;
        assert_eq!(sorted.len(), all.len());
        assert_eq!(sorted[0], XdmItem::Node(all[0].clone()));
        Ok(())
    }
}
