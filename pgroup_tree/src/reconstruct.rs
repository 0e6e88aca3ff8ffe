//! Leadership tree reconstruction.
//!
//! Given a [`Snapshot`] this module infers who leads which process group and
//! which session, and who parented whom, producing a [`Tree`] of typed edges.
//! A snapshot may imply a leader that is not present: the leader exited, or
//! its pid was reused by an unrelated process. Rather than fail, the
//! reconstructor synthesizes placeholder nodes to stand in for the missing
//! leaders. Any snapshot, however malformed, yields a tree.
//!
//! Rows are scanned in ascending pid order, ties between duplicate pids or
//! duplicate leaders going to the first match. Rows sharing a pid keep the
//! order they have in the snapshot, so the winner of a tie depends on row
//! position only, never on the identifiers the rows carry. Reconstruction is
//! pure: the same snapshot always yields the same nodes and edges in the same
//! order, and snapshots with unique pids reconstruct identically whatever
//! order their rows were exported in.

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::{
    graph::Graph,
    snapshot::{Pid, Row, Snapshot},
};

/// Index of a node in a [`Tree`].
pub type NodeId = usize;

/// What a node of a [`Tree`] stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// A process present in the snapshot
    Process,
    /// Synthesized for a group whose leader pid is held by a process that does
    /// not lead the group
    DeputyGroupLeader,
    /// Synthesized for a group whose leader pid is held by no process at all
    GroupLeaderStandIn,
    /// Synthesized for a session whose leader is not in the snapshot
    SessionLeaderStandIn,
}

impl Role {
    /// Whether nodes of this role were synthesized by the reconstructor.
    #[must_use]
    pub const fn is_placeholder(self) -> bool {
        !matches!(self, Role::Process)
    }

    /// Stable, human readable name of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Process => "process",
            Role::DeputyGroupLeader => "deputy_group_leader",
            Role::GroupLeaderStandIn => "group_leader_stand_in",
            Role::SessionLeaderStandIn => "session_leader_stand_in",
        }
    }
}

/// The relation an [`Edge`] expresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Parent process to child process
    Parent,
    /// Group leader, real or not, to group member
    Group,
    /// Session leader, real or not, to session member
    Session,
    /// Deputy placeholder to the process holding the group leader's pid
    Deputy,
}

impl EdgeKind {
    /// Stable, human readable name of the relation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            EdgeKind::Parent => "parent",
            EdgeKind::Group => "group",
            EdgeKind::Session => "session",
            EdgeKind::Deputy => "deputy",
        }
    }
}

/// A node of a [`Tree`].
///
/// Placeholders carry the identifiers of the leader they stand in for. They
/// have no parent, hence no `ppid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Node {
    /// Process id, or the pid of the absent leader
    pub pid: Pid,
    /// Process group id
    pub pgid: Pid,
    /// Session id
    pub sid: Pid,
    /// Parent process id, `None` for placeholders
    pub ppid: Option<Pid>,
    /// What this node stands for
    pub role: Role,
}

impl Node {
    fn process(row: &Row) -> Self {
        Self {
            pid: row.pid,
            pgid: row.pgid,
            sid: row.sid,
            ppid: Some(row.ppid),
            role: Role::Process,
        }
    }
}

/// A directed, typed edge between two nodes of a [`Tree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Edge {
    /// Source node
    pub from: NodeId,
    /// Destination node
    pub to: NodeId,
    /// The relation expressed
    pub kind: EdgeKind,
}

/// A reconstructed leadership forest.
///
/// Real processes occupy node ids `0..real_count()` in ascending row order,
/// placeholders follow in order of synthesis. A tree is never mutated after
/// construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tree {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    real: usize,
}

impl Tree {
    /// All nodes, real processes first.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// All edges, in order of construction.
    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// The node with the given id, if any.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Number of nodes standing for real processes.
    #[must_use]
    pub fn real_count(&self) -> usize {
        self.real
    }

    /// Number of synthesized placeholder nodes.
    #[must_use]
    pub fn placeholder_count(&self) -> usize {
        self.nodes.len() - self.real
    }

    /// Edges of the given kind.
    pub fn edges_of(&self, kind: EdgeKind) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |edge| edge.kind == kind)
    }

    /// Sources of every edge of `kind` arriving at `id`.
    pub fn sources(&self, id: NodeId, kind: EdgeKind) -> impl Iterator<Item = NodeId> + '_ {
        self.edges
            .iter()
            .filter(move |edge| edge.to == id && edge.kind == kind)
            .map(|edge| edge.from)
    }

    /// Node id of the first real process with the given pid.
    #[must_use]
    pub fn find(&self, pid: Pid) -> Option<NodeId> {
        self.nodes[..self.real]
            .iter()
            .position(|node| node.pid == pid)
    }

    /// Convert into the generic attributed graph used for export and for
    /// structural comparison.
    #[must_use]
    pub fn graph(&self) -> Graph {
        Graph::from(self)
    }
}

/// Placeholder bookkeeping. Each absent leader is synthesized once and shared
/// by every member that refers to it.
#[derive(Debug, Default)]
struct Builder {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    deputies: FxHashMap<Pid, NodeId>,
    group_stand_ins: FxHashMap<Pid, NodeId>,
    session_stand_ins: FxHashMap<Pid, NodeId>,
}

impl Builder {
    fn edge(&mut self, from: NodeId, to: NodeId, kind: EdgeKind) {
        self.edges.push(Edge { from, to, kind });
    }

    fn placeholder(&mut self, pid: Pid, sid: Pid, role: Role) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            pid,
            pgid: pid,
            sid,
            ppid: None,
            role,
        });
        id
    }

    /// Deputy for group `pgid`, chained to `holder`, the process that owns
    /// the pid but not the group.
    fn deputy(&mut self, pgid: Pid, sid: Pid, holder: NodeId) -> NodeId {
        if let Some(id) = self.deputies.get(&pgid) {
            return *id;
        }
        let id = self.placeholder(pgid, sid, Role::DeputyGroupLeader);
        self.edge(id, holder, EdgeKind::Deputy);
        self.deputies.insert(pgid, id);
        id
    }

    fn group_stand_in(&mut self, pgid: Pid, sid: Pid) -> NodeId {
        if let Some(id) = self.group_stand_ins.get(&pgid) {
            return *id;
        }
        let id = self.placeholder(pgid, sid, Role::GroupLeaderStandIn);
        self.group_stand_ins.insert(pgid, id);
        id
    }

    fn session_stand_in(&mut self, sid: Pid) -> NodeId {
        if let Some(id) = self.session_stand_ins.get(&sid) {
            return *id;
        }
        let id = self.placeholder(sid, sid, Role::SessionLeaderStandIn);
        self.session_stand_ins.insert(sid, id);
        id
    }
}

/// Reconstruct the leadership tree implied by `snapshot`.
///
/// For every process `n`:
///
/// * a `parent` edge arrives from the process whose pid is `n.ppid`, when
///   there is one;
/// * a `group` edge arrives from the leader of `n`'s group. Absent a leader,
///   if some process holds pid `n.pgid` without leading the group, a deputy
///   placeholder is chained `deputy -> holder -> n`. Otherwise the edge
///   arrives from a group stand-in;
/// * a `session` edge arrives from the leader of `n`'s session or, absent
///   one, from a session stand-in.
///
/// Leaders get no edge from themselves. Rows sharing a pid keep their
/// snapshot order and the first of them wins every lookup by pid.
#[must_use]
pub fn reconstruct(snapshot: &Snapshot) -> Tree {
    let mut rows: Vec<Row> = snapshot.rows().to_vec();
    rows.sort_by_key(|row| row.pid);

    let mut by_pid: FxHashMap<Pid, NodeId> = FxHashMap::default();
    let mut group_leaders: FxHashMap<Pid, NodeId> = FxHashMap::default();
    let mut session_leaders: FxHashMap<Pid, NodeId> = FxHashMap::default();
    for (id, row) in rows.iter().enumerate() {
        by_pid.entry(row.pid).or_insert(id);
        if row.is_group_leader() {
            group_leaders.entry(row.pgid).or_insert(id);
        }
        if row.is_session_leader() {
            session_leaders.entry(row.sid).or_insert(id);
        }
    }

    let mut builder = Builder {
        nodes: rows.iter().map(Node::process).collect(),
        ..Builder::default()
    };

    for (id, row) in rows.iter().enumerate() {
        if let Some(&parent) = by_pid.get(&row.ppid) {
            if parent != id {
                builder.edge(parent, id, EdgeKind::Parent);
            }
        }

        match group_leaders.get(&row.pgid) {
            Some(&leader) => {
                if leader != id {
                    builder.edge(leader, id, EdgeKind::Group);
                }
            }
            None => match by_pid.get(&row.pgid) {
                // The holder cannot be `id` itself: a process whose pid is
                // its pgid leads the group and would have been found above.
                Some(&holder) => {
                    builder.deputy(row.pgid, row.sid, holder);
                    builder.edge(holder, id, EdgeKind::Group);
                }
                None => {
                    let stand_in = builder.group_stand_in(row.pgid, row.sid);
                    builder.edge(stand_in, id, EdgeKind::Group);
                }
            },
        }

        match session_leaders.get(&row.sid) {
            Some(&leader) => {
                if leader != id {
                    builder.edge(leader, id, EdgeKind::Session);
                }
            }
            None => {
                let stand_in = builder.session_stand_in(row.sid);
                builder.edge(stand_in, id, EdgeKind::Session);
            }
        }
    }

    Tree {
        nodes: builder.nodes,
        edges: builder.edges,
        real: rows.len(),
    }
}
