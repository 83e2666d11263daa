//! 依赖图构建和拓扑排序
//!
//! 每个资源的使用者按声明顺序形成一条链（创建者在最前），
//! 链上相邻的两个 node 之间连一条边。排序时没有依赖关系的 node 保持插入顺序。

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::handle::FgResourceHandle;

/// 依赖边：从 producer 到 consumer
#[derive(Clone, Debug)]
pub struct FgDependencyEdge {
    /// 先执行的 node 索引
    pub producer: usize,
    /// 后执行的 node 索引
    pub consumer: usize,
    pub resource: FgResourceHandle,
}

/// node 之间的依赖图，node 以插入顺序的索引表示
pub struct FgDependencyGraph {
    node_count: usize,
    /// 邻接表（出边）
    adjacency: Vec<Vec<usize>>,
    in_degrees: Vec<usize>,
    edges: Vec<FgDependencyEdge>,
}

impl FgDependencyGraph {
    pub fn new(node_count: usize) -> Self {
        Self {
            node_count,
            adjacency: vec![Vec::new(); node_count],
            in_degrees: vec![0; node_count],
            edges: Vec::new(),
        }
    }

    /// 由资源使用链构建依赖图
    ///
    /// `chains` 中每一项是一个资源和它的使用者索引序列（按使用顺序）。
    pub fn from_chains<'a>(node_count: usize, chains: impl IntoIterator<Item = (FgResourceHandle, &'a [usize])>) -> Self {
        let mut graph = Self::new(node_count);
        for (resource, users) in chains {
            for pair in users.windows(2) {
                if pair[0] != pair[1] {
                    graph.add_edge(pair[0], pair[1], resource);
                }
            }
        }
        graph
    }

    pub fn add_edge(&mut self, producer: usize, consumer: usize, resource: FgResourceHandle) {
        // 避免重复边
        if !self.adjacency[producer].contains(&consumer) {
            self.adjacency[producer].push(consumer);
            self.in_degrees[consumer] += 1;
        }

        self.edges.push(FgDependencyEdge {
            producer,
            consumer,
            resource,
        });
    }

    /// 拓扑排序，入度为 0 的 node 中总是优先选择插入顺序最靠前的
    ///
    /// # 返回
    /// - `Ok(order)`: 排序后的 node 索引
    /// - `Err(remaining)`: 存在循环依赖，返回无法排序的 node 索引
    pub fn topological_sort(&self) -> Result<Vec<usize>, Vec<usize>> {
        let mut in_degrees = self.in_degrees.clone();
        let mut ready: BinaryHeap<Reverse<usize>> =
            (0..self.node_count).filter(|&i| in_degrees[i] == 0).map(Reverse).collect();
        let mut result = Vec::with_capacity(self.node_count);

        while let Some(Reverse(node)) = ready.pop() {
            result.push(node);

            for &neighbor in &self.adjacency[node] {
                in_degrees[neighbor] -= 1;
                if in_degrees[neighbor] == 0 {
                    ready.push(Reverse(neighbor));
                }
            }
        }

        if result.len() != self.node_count {
            let remaining: Vec<usize> = (0..self.node_count).filter(|&i| in_degrees[i] > 0).collect();
            Err(remaining)
        } else {
            Ok(result)
        }
    }

    /// 所有依赖边，同一对 node 因为不同资源可能出现多次
    pub fn edges(&self) -> &[FgDependencyEdge] {
        &self.edges
    }
}
