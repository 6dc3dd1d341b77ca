//! VFH* lookahead tree search.
//!
//! A bounded best-first expansion over candidate flight directions: each
//! expanded node rebuilds the obstacle histogram recentered at its own
//! position, evaluates the cost field there, and spawns the cheapest
//! directions as children one step further out. The tree is a flat array
//! with parent indices, rebuilt every planning tick.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::config::PlannerConfig;
use crate::core::geometry::{azimuth_to_yaw, next_yaw, polar_to_cartesian, yaw_to_azimuth_deg, Vec3};
use crate::planning::cloud::FilteredCloud;
use crate::planning::cost::{get_best_candidates, get_cost_matrix, CostParams};
use crate::planning::histogram::{
    calculate_fov, combine_histogram, generate_new_histogram, propagate_histogram, Histogram,
    ALPHA_RES,
};

/// How many ticks a previously found path may be served while the tree
/// search keeps coming up empty.
pub const TREE_REUSE_MAX_AGE: i32 = 10;

/// One node of the lookahead tree.
///
/// `origin` indexes the parent in the tree array and is always smaller
/// than the node's own index, so the implicit edges cannot form cycles.
#[derive(Debug, Clone, Copy)]
pub struct TreeNode {
    /// Node position in the local frame
    pub position: Vec3,
    /// FCU-frame yaw of the edge leading into this node
    pub yaw: f32,
    /// Accumulated edge cost from the root
    pub cost: f32,
    /// Distance to the goal
    pub heuristic: f32,
    /// Parent index (self for the root)
    pub origin: usize,
    /// Tree depth, root = 0
    pub depth: usize,
    /// Node has been expanded
    pub closed: bool,
}

impl TreeNode {
    /// f = g + h used to order the open set.
    #[inline]
    pub fn total_cost(&self) -> f32 {
        self.cost + self.heuristic
    }
}

/// Open-set entry. Min-ordered on f with insertion order as the
/// deterministic tie break (earlier pushes pop first).
struct OpenNode {
    f: f32,
    order: usize,
    index: usize,
}

impl PartialEq for OpenNode {
    fn eq(&self, other: &Self) -> bool {
        self.order == other.order
    }
}

impl Eq for OpenNode {}

impl Ord for OpenNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (lower f = higher priority)
        other
            .f
            .partial_cmp(&self.f)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.order.cmp(&self.order))
    }
}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// VFH* tree planner state.
pub struct StarPlanner {
    children_per_node: usize,
    n_expanded_nodes: usize,
    tree_node_distance: f32,
    smoothing_margin_degrees: f32,

    position: Vec3,
    yaw: f32,
    goal: Vec3,
    h_fov_deg: f32,
    v_fov_deg: f32,
    cost_params: CostParams,
    cloud: FilteredCloud,
    reprojected_points: Vec<Vec3>,
    reprojected_ages: Vec<i32>,
    last_direction: Vec3,

    /// All nodes created this tick, root first
    pub tree: Vec<TreeNode>,
    /// Indices of expanded nodes, expansion order
    pub closed_set: Vec<usize>,
    /// Best path found, root position first
    pub path_node_positions: Vec<Vec3>,
    /// Ticks since the last successful tree build
    pub tree_age: i32,
}

impl Default for StarPlanner {
    fn default() -> Self {
        Self::new()
    }
}

impl StarPlanner {
    /// Create a planner with default search shape.
    pub fn new() -> Self {
        Self {
            children_per_node: 5,
            n_expanded_nodes: 30,
            tree_node_distance: 1.0,
            smoothing_margin_degrees: 30.0,
            position: Vec3::ZERO,
            yaw: 0.0,
            goal: Vec3::ZERO,
            h_fov_deg: 59.0,
            v_fov_deg: 46.0,
            cost_params: CostParams::default(),
            cloud: FilteredCloud::default(),
            reprojected_points: Vec::new(),
            reprojected_ages: Vec::new(),
            last_direction: Vec3::ZERO,
            tree: Vec::new(),
            closed_set: Vec::new(),
            path_node_positions: Vec::new(),
            tree_age: 0,
        }
    }

    /// Pull the search shape out of the planner configuration.
    pub fn set_params(&mut self, config: &PlannerConfig) {
        self.children_per_node = config.children_per_node;
        self.n_expanded_nodes = config.n_expanded_nodes;
        self.tree_node_distance = config.tree_node_distance;
        self.smoothing_margin_degrees = config.smoothing_margin_degrees;
    }

    /// Update vehicle pose (position + FCU-frame yaw in radians).
    pub fn set_pose(&mut self, position: Vec3, yaw: f32) {
        self.position = position;
        self.yaw = yaw;
    }

    /// Update the goal position.
    pub fn set_goal(&mut self, goal: Vec3) {
        self.goal = goal;
    }

    /// Update the camera field of view in degrees.
    pub fn set_fov(&mut self, h_fov_deg: f32, v_fov_deg: f32) {
        self.h_fov_deg = h_fov_deg;
        self.v_fov_deg = v_fov_deg;
    }

    /// Update the cost weights for this tick.
    pub fn set_cost_params(&mut self, params: CostParams) {
        self.cost_params = params;
    }

    /// Update the cropped cloud the tree plans against.
    pub fn set_cloud(&mut self, cloud: FilteredCloud) {
        self.cloud = cloud;
    }

    /// Update the reprojected stale obstacles carried outside the FOV.
    pub fn set_reprojected_points(&mut self, points: Vec<Vec3>, ages: Vec<i32>) {
        self.reprojected_points = points;
        self.reprojected_ages = ages;
    }

    /// Last commanded direction, projected to goal distance, for the
    /// smoothness term.
    pub fn set_last_direction(&mut self, direction: Vec3) {
        self.last_direction = direction;
    }

    /// Advance the path age by one tick.
    pub fn age_tree(&mut self) {
        self.tree_age += 1;
    }

    /// Run one tick's bounded best-first search.
    ///
    /// Populates `tree`, `closed_set` and `path_node_positions`. When the
    /// search produces no children at all (every direction blocked), the
    /// previous path is kept for up to [`TREE_REUSE_MAX_AGE`] ticks
    /// before being dropped.
    pub fn build_look_ahead_tree(&mut self) {
        self.tree.clear();
        self.closed_set.clear();

        let mut heap: BinaryHeap<OpenNode> = BinaryHeap::new();
        let mut order = 0usize;

        self.tree.push(TreeNode {
            position: self.position,
            yaw: self.yaw,
            cost: 0.0,
            heuristic: self.position.distance(&self.goal),
            origin: 0,
            depth: 0,
            closed: false,
        });
        heap.push(OpenNode {
            f: self.tree[0].total_cost(),
            order,
            index: 0,
        });

        let mut terminal: Option<usize> = None;
        let mut expansions = 0usize;

        while expansions < self.n_expanded_nodes {
            let open = match heap.pop() {
                Some(n) => n,
                None => break,
            };
            let idx = open.index;
            if self.tree[idx].closed {
                continue;
            }
            self.tree[idx].closed = true;
            self.closed_set.push(idx);
            expansions += 1;

            let origin_position = self.tree[idx].position;
            let origin_yaw = self.tree[idx].yaw;

            if idx != 0 && origin_position.distance(&self.goal) < self.tree_node_distance {
                terminal = Some(idx);
                break;
            }

            // obstacle field recentered at the expanded node
            let mut propagated = Histogram::new(2 * ALPHA_RES);
            propagate_histogram(
                &mut propagated,
                &self.reprojected_points,
                &self.reprojected_ages,
                &origin_position,
            );
            let mut histogram = Histogram::new(ALPHA_RES);
            generate_new_histogram(&mut histogram, &self.cloud, &origin_position);
            let fov = calculate_fov(self.h_fov_deg, self.v_fov_deg, origin_yaw, 0.0);
            combine_histogram(&mut histogram, &propagated, &fov);

            let (matrix, _) = get_cost_matrix(
                &histogram,
                &self.goal,
                &origin_position,
                yaw_to_azimuth_deg(origin_yaw),
                &self.last_direction,
                &self.cost_params,
                true,
                self.smoothing_margin_degrees,
            );

            let parent_cost = self.tree[idx].cost;
            let parent_depth = self.tree[idx].depth;

            for candidate in get_best_candidates(&matrix, self.children_per_node) {
                let child_pol = candidate.to_polar(self.tree_node_distance);
                let child_pos = polar_to_cartesian(&child_pol, &origin_position);
                let child_yaw = azimuth_to_yaw(next_yaw(&origin_position, &child_pos));

                let cost = parent_cost + candidate.cost + self.tree_node_distance;
                let heuristic = child_pos.distance(&self.goal);

                self.tree.push(TreeNode {
                    position: child_pos,
                    yaw: child_yaw,
                    cost,
                    heuristic,
                    origin: idx,
                    depth: parent_depth + 1,
                    closed: false,
                });
                order += 1;
                heap.push(OpenNode {
                    f: cost + heuristic,
                    order,
                    index: self.tree.len() - 1,
                });
            }
        }

        if self.tree.len() <= 1 {
            // every direction blocked at the root: serve the cached path
            // while it is fresh enough
            if self.tree_age > TREE_REUSE_MAX_AGE {
                self.path_node_positions.clear();
            }
            tracing::warn!(
                tree_age = self.tree_age,
                "lookahead tree produced no candidates"
            );
            return;
        }

        let terminal = terminal.unwrap_or_else(|| self.best_leaf());
        self.path_node_positions = self.extract_path(terminal);
        self.tree_age = 0;
    }

    /// Non-root node with the lowest f, used when the expansion budget
    /// runs out before reaching the goal.
    fn best_leaf(&self) -> usize {
        let mut best = 1;
        let mut best_f = self.tree[1].total_cost();
        for (i, node) in self.tree.iter().enumerate().skip(2) {
            let f = node.total_cost();
            if f < best_f {
                best_f = f;
                best = i;
            }
        }
        best
    }

    /// Walk the origin chain from `terminal` to the root and reverse.
    fn extract_path(&self, terminal: usize) -> Vec<Vec3> {
        let mut path = Vec::new();
        let mut current = terminal;
        loop {
            path.push(self.tree[current].position);
            let parent = self.tree[current].origin;
            if parent == current {
                break;
            }
            current = parent;
        }
        path.reverse();
        path
    }
}
