// ABOUTME: Directed acyclic task graph with cycle checks on every new dependency edge
// ABOUTME: Also defines the GraphApi trait shared by task graphs and sub-workflow tasks

use indexmap::IndexMap;
use petgraph::algo::has_path_connecting;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::Direction;
use std::collections::{HashMap, HashSet};

use super::error::TaskGraphError;
use super::task::{Task, TaskId};

type Result<T> = std::result::Result<T, TaskGraphError>;

/// Tasks plus "runs after" edges
///
/// Edges point from a dependency to its dependent. Iteration follows insertion
/// order.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    name: String,
    graph: StableDiGraph<Task, ()>,
    indices: IndexMap<TaskId, NodeIndex>,
    names: HashMap<String, TaskId>,
}

impl TaskGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            graph: StableDiGraph::new(),
            indices: IndexMap::new(),
            names: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Add a task and return its id; operation task names must be unique
    pub fn add_task(&mut self, task: impl Into<Task>) -> Result<TaskId> {
        let task = task.into();
        let id = task.id().to_string();

        if let Task::Operation(operation) = &task {
            if self.names.contains_key(&operation.name) {
                return Err(TaskGraphError::DuplicateTaskName(operation.name.clone()));
            }
            self.names.insert(operation.name.clone(), id.clone());
        }

        let index = self.graph.add_node(task);
        self.indices.insert(id.clone(), index);
        Ok(id)
    }

    pub fn add_tasks<I, T>(&mut self, tasks: I) -> Result<Vec<TaskId>>
    where
        I: IntoIterator<Item = T>,
        T: Into<Task>,
    {
        tasks.into_iter().map(|task| self.add_task(task)).collect()
    }

    /// Make `task` run after every task in `after`
    ///
    /// Either every edge is added or, on error, none are.
    pub fn add_dependency(&mut self, task: &str, after: &[TaskId]) -> Result<()> {
        let task_index = self.index(task)?;
        let dependency_indices = after
            .iter()
            .map(|dependency| self.index(dependency))
            .collect::<Result<Vec<_>>>()?;

        // New edges all point into `task`, so none of them can create a path out
        // of it; checking against the current graph covers the whole batch.
        for &dependency_index in &dependency_indices {
            // An edge dependency -> task closes a cycle iff task already reaches dependency
            if task_index == dependency_index
                || has_path_connecting(&self.graph, task_index, dependency_index, None)
            {
                return Err(TaskGraphError::CycleDetected {
                    task: self.graph[task_index].name().to_string(),
                    after: self.graph[dependency_index].name().to_string(),
                });
            }
        }

        for dependency_index in dependency_indices {
            self.graph.update_edge(dependency_index, task_index, ());
        }

        Ok(())
    }

    pub fn remove_task(&mut self, id: &str) -> Option<Task> {
        let index = self.indices.shift_remove(id)?;
        let task = self.graph.remove_node(index)?;
        if let Task::Operation(operation) = &task {
            self.names.remove(&operation.name);
        }
        Some(task)
    }

    pub fn get_task(&self, id: &str) -> Option<&Task> {
        self.indices.get(id).map(|&index| &self.graph[index])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.indices.contains_key(id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> + '_ {
        self.indices.values().map(move |&index| &self.graph[index])
    }

    pub fn task_ids(&self) -> Vec<TaskId> {
        self.indices.keys().cloned().collect()
    }

    /// Tasks that must finish before `id` may start, in insertion order
    pub fn dependencies(&self, id: &str) -> Vec<TaskId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Tasks waiting on `id`, in insertion order
    pub fn dependents(&self, id: &str) -> Vec<TaskId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Whether `task` depends on `on`, directly or transitively
    pub fn has_dependency_path(&self, task: &str, on: &str) -> bool {
        match (self.indices.get(task), self.indices.get(on)) {
            (Some(&task_index), Some(&on_index)) if task_index != on_index => {
                has_path_connecting(&self.graph, on_index, task_index, None)
            }
            _ => false,
        }
    }

    /// Tasks without dependencies
    pub fn root_tasks(&self) -> Vec<TaskId> {
        self.indices
            .iter()
            .filter(|(_, &index)| {
                self.graph
                    .neighbors_directed(index, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Layer the graph into batches whose members only depend on earlier batches
    pub fn execution_batches(&self) -> Vec<Vec<TaskId>> {
        let mut batches = Vec::new();
        let mut completed: HashSet<NodeIndex> = HashSet::new();
        let mut remaining: Vec<(&TaskId, NodeIndex)> =
            self.indices.iter().map(|(id, &index)| (id, index)).collect();

        while !remaining.is_empty() {
            let (ready, blocked): (Vec<_>, Vec<_>) =
                remaining.into_iter().partition(|(_, index)| {
                    self.graph
                        .neighbors_directed(*index, Direction::Incoming)
                        .all(|dependency| completed.contains(&dependency))
                });

            if ready.is_empty() {
                break;
            }

            completed.extend(ready.iter().map(|(_, index)| *index));
            batches.push(ready.into_iter().map(|(id, _)| id.clone()).collect());
            remaining = blocked;
        }

        batches
    }

    fn index(&self, id: &str) -> Result<NodeIndex> {
        self.indices
            .get(id)
            .copied()
            .ok_or_else(|| TaskGraphError::UnknownTask(id.to_string()))
    }

    fn neighbors(&self, id: &str, direction: Direction) -> Vec<TaskId> {
        let Some(&index) = self.indices.get(id) else {
            return Vec::new();
        };

        let mut neighbors: Vec<(usize, TaskId)> = self
            .graph
            .neighbors_directed(index, direction)
            .filter_map(|neighbor| {
                let neighbor_id = self.graph[neighbor].id();
                self.indices
                    .get_index_of(neighbor_id)
                    .map(|position| (position, neighbor_id.to_string()))
            })
            .collect();
        neighbors.sort_by_key(|(position, _)| *position);
        neighbors.into_iter().map(|(_, id)| id).collect()
    }
}

/// Graph access shared by `TaskGraph` and `WorkflowTask`
pub trait GraphApi {
    fn graph(&self) -> &TaskGraph;
    fn graph_mut(&mut self) -> &mut TaskGraph;

    fn add_task(&mut self, task: impl Into<Task>) -> Result<TaskId> {
        self.graph_mut().add_task(task)
    }

    fn add_dependency(&mut self, task: &str, after: &[TaskId]) -> Result<()> {
        self.graph_mut().add_dependency(task, after)
    }

    fn remove_task(&mut self, id: &str) -> Option<Task> {
        self.graph_mut().remove_task(id)
    }

    fn get_task(&self, id: &str) -> Option<&Task> {
        self.graph().get_task(id)
    }

    fn dependencies(&self, id: &str) -> Vec<TaskId> {
        self.graph().dependencies(id)
    }

    fn dependents(&self, id: &str) -> Vec<TaskId> {
        self.graph().dependents(id)
    }

    fn task_ids(&self) -> Vec<TaskId> {
        self.graph().task_ids()
    }
}

impl GraphApi for TaskGraph {
    fn graph(&self) -> &TaskGraph {
        self
    }

    fn graph_mut(&mut self) -> &mut TaskGraph {
        self
    }
}
