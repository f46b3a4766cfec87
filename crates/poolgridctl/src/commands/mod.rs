//! Subcommand implementations. Each returns the JSON value to print.

use std::path::Path;

use anyhow::{Context as _, anyhow};
use serde::Serialize;
use serde_json::{Value, json};

use poolgrid_nodegroup::{MachineController, NodeGroup, normalized_provider_string};
use poolgrid_nodegroupset::{
    ComparatorConfig, GroupSample, find_similar_node_groups, is_node_info_similar,
    similarity_classes,
};
use poolgrid_state::{Node, NodeInfo, StateStore};

use crate::fixture::Fixture;

/// Everything a subcommand needs.
pub struct Context {
    pub controller: MachineController,
    pub similarity: ComparatorConfig,
}

#[derive(Debug, Serialize)]
struct NodeGroupSummary {
    id: String,
    min_size: i32,
    max_size: i32,
    target_size: i32,
}

impl NodeGroupSummary {
    fn of(group: &NodeGroup) -> anyhow::Result<Self> {
        Ok(Self {
            id: group.id(),
            min_size: group.min_size(),
            max_size: group.max_size(),
            target_size: group.target_size()?,
        })
    }
}

pub fn import(store: &StateStore, path: &Path) -> anyhow::Result<Value> {
    let fixture = Fixture::from_file(path)
        .with_context(|| format!("reading fixture {}", path.display()))?;
    let summary = fixture.load_into(store)?;
    Ok(serde_json::to_value(summary)?)
}

pub fn node_groups(ctx: &Context) -> anyhow::Result<Value> {
    let summaries = ctx
        .controller
        .node_groups()?
        .iter()
        .map(NodeGroupSummary::of)
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(serde_json::to_value(summaries)?)
}

pub fn nodes(ctx: &Context, id: &str) -> anyhow::Result<Value> {
    Ok(serde_json::to_value(group(ctx, id)?.nodes()?)?)
}

pub fn target_size(ctx: &Context, id: &str) -> anyhow::Result<Value> {
    Ok(serde_json::to_value(NodeGroupSummary::of(&group(ctx, id)?)?)?)
}

pub fn increase_size(ctx: &Context, id: &str, delta: i32) -> anyhow::Result<Value> {
    let group = group(ctx, id)?;
    group.increase_size(delta)?;
    Ok(serde_json::to_value(NodeGroupSummary::of(&group)?)?)
}

pub fn decrease_target_size(ctx: &Context, id: &str, delta: i32) -> anyhow::Result<Value> {
    let group = group(ctx, id)?;
    group.decrease_target_size(delta)?;
    Ok(serde_json::to_value(NodeGroupSummary::of(&group)?)?)
}

pub fn delete_nodes(ctx: &Context, id: &str, provider_ids: &[String]) -> anyhow::Result<Value> {
    let group = group(ctx, id)?;
    let nodes = provider_ids
        .iter()
        .map(|p| node_for_provider_id(ctx, p))
        .collect::<anyhow::Result<Vec<_>>>()?;
    group.delete_nodes(&nodes)?;
    Ok(serde_json::to_value(NodeGroupSummary::of(&group)?)?)
}

pub fn template(ctx: &Context, id: &str) -> anyhow::Result<Value> {
    Ok(serde_json::to_value(group(ctx, id)?.template_node_info()?)?)
}

pub fn similar(ctx: &Context, a: &str, b: &str) -> anyhow::Result<Value> {
    let a = node_info(ctx, a)?;
    let b = node_info(ctx, b)?;
    let similar = is_node_info_similar(&a, &b, &ctx.similarity);
    Ok(json!({ "a": a.node.name, "b": b.node.name, "similar": similar }))
}

/// With an id, the groups similar to it; without, all groups
/// partitioned into similarity classes.
pub fn similar_groups(ctx: &Context, id: Option<&str>) -> anyhow::Result<Value> {
    let samples = ctx
        .controller
        .node_groups()?
        .iter()
        .filter_map(|g| match g.sample_node_info() {
            Ok(info) => Some(Ok(GroupSample::new(g.id(), info))),
            // Groups with no live node and no template cannot be compared.
            Err(poolgrid_nodegroup::NodeGroupError::NotImplemented) => None,
            Err(e) => Some(Err(e)),
        })
        .collect::<Result<Vec<_>, _>>()?;

    match id {
        Some(id) => {
            let target = samples
                .iter()
                .find(|s| s.id == id)
                .ok_or_else(|| anyhow!("node group {id} has no node or template to compare"))?;
            let similar = find_similar_node_groups(target, &samples, &ctx.similarity);
            Ok(json!({ "id": id, "similar": similar }))
        }
        None => Ok(json!({ "classes": similarity_classes(&samples, &ctx.similarity) })),
    }
}

fn group(ctx: &Context, id: &str) -> anyhow::Result<NodeGroup> {
    ctx.controller
        .node_group(id)?
        .ok_or_else(|| anyhow!("node group {id} not found"))
}

fn node_info(ctx: &Context, name: &str) -> anyhow::Result<NodeInfo> {
    let node = ctx
        .controller
        .store()
        .get_node(name)?
        .ok_or_else(|| anyhow!("node {name} not found"))?;
    Ok(NodeInfo::new(node))
}

/// The registered node with this provider id, or a bare node carrying
/// only the id (how failed machines are addressed).
fn node_for_provider_id(ctx: &Context, provider_id: &str) -> anyhow::Result<Node> {
    let id = normalized_provider_string(provider_id);
    if let Some(name) = ctx.controller.registry().node_for(&id) {
        if let Some(node) = ctx.controller.store().get_node(&name)? {
            return Ok(node);
        }
    }
    Ok(Node {
        name: provider_id.to_string(),
        provider_id: Some(provider_id.to_string()),
        ..Default::default()
    })
}
