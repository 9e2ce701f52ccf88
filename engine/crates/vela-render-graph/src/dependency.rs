//! 节点之间的依赖分析和拓扑排序
//!
//! 资源以名字在图内的编号表示。

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// 依赖边：从 producer 到 consumer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DependencyEdge {
    pub producer: usize,
    pub consumer: usize,
    pub resource: u32,
}

pub struct DependencyGraph {
    node_count: usize,
    /// 邻接表（出边）
    adjacency: Vec<Vec<usize>>,
    in_degrees: Vec<usize>,
    edges: Vec<DependencyEdge>,
}
impl DependencyGraph {
    pub fn new(node_count: usize) -> Self {
        Self {
            node_count,
            adjacency: vec![Vec::new(); node_count],
            in_degrees: vec![0; node_count],
            edges: Vec::new(),
        }
    }

    pub fn add_edge(&mut self, producer: usize, consumer: usize, resource: u32) {
        if producer == consumer {
            return;
        }
        // 避免重复边
        if !self.adjacency[producer].contains(&consumer) {
            self.adjacency[producer].push(consumer);
            self.in_degrees[consumer] += 1;
        }
        self.edges.push(DependencyEdge {
            producer,
            consumer,
            resource,
        });
    }

    /// 每次取出下标最小的就绪节点，没有依赖关系的节点保持声明顺序
    ///
    /// 存在环时返回环上（以及被环阻塞）的节点
    pub fn topological_sort(&self) -> Result<Vec<usize>, Vec<usize>> {
        let mut in_degrees = self.in_degrees.clone();
        let mut ready: BinaryHeap<Reverse<usize>> =
            (0..self.node_count).filter(|&i| in_degrees[i] == 0).map(Reverse).collect();
        let mut result = Vec::with_capacity(self.node_count);

        while let Some(Reverse(node)) = ready.pop() {
            result.push(node);
            for &next in &self.adjacency[node] {
                in_degrees[next] -= 1;
                if in_degrees[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if result.len() == self.node_count {
            Ok(result)
        } else {
            Err((0..self.node_count).filter(|&i| in_degrees[i] > 0).collect())
        }
    }

    pub fn predecessors(&self, node: usize) -> Vec<usize> {
        (0..self.node_count).filter(|&i| self.adjacency[i].contains(&node)).collect()
    }

    #[inline]
    pub fn successors(&self, node: usize) -> &[usize] {
        &self.adjacency[node]
    }

    #[inline]
    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }
}

pub struct DependencyAnalyzer;
impl DependencyAnalyzer {
    /// 分析资源依赖
    ///
    /// - 写后写：同一资源的 writer 按声明顺序串联，后一个 writer 依赖前一个
    /// - 只读的 reader 读取最终结果，依赖最后一个 writer，与声明顺序无关
    ///
    /// 同时读写一个资源的节点视为 writer。
    pub fn analyze(reads: &[Vec<u32>], writes: &[Vec<u32>]) -> DependencyGraph {
        let node_count = reads.len().min(writes.len());
        let mut graph = DependencyGraph::new(node_count);

        let mut writers: HashMap<u32, Vec<usize>> = HashMap::new();
        for (node, resources) in writes.iter().enumerate().take(node_count) {
            for &resource in resources {
                let list = writers.entry(resource).or_default();
                if list.last() != Some(&node) {
                    list.push(node);
                }
            }
        }

        for (&resource, list) in &writers {
            for pair in list.windows(2) {
                graph.add_edge(pair[0], pair[1], resource);
            }
        }

        for (node, resources) in reads.iter().enumerate().take(node_count) {
            let own_writes: HashSet<u32> = writes[node].iter().copied().collect();
            for &resource in resources {
                if own_writes.contains(&resource) {
                    continue;
                }
                if let Some(&last) = writers.get(&resource).and_then(|list| list.last()) {
                    graph.add_edge(last, node, resource);
                }
            }
        }

        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_dependency() {
        let graph = DependencyAnalyzer::analyze(&[vec![], vec![0]], &[vec![0], vec![]]);
        assert_eq!(graph.topological_sort().unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_chain_dependency() {
        // 0 -> 1 -> 2
        let graph = DependencyAnalyzer::analyze(&[vec![], vec![0], vec![1]], &[vec![0], vec![1], vec![]]);
        assert_eq!(graph.topological_sort().unwrap(), vec![0, 1, 2]);
        assert_eq!(graph.predecessors(2), vec![1]);
    }

    #[test]
    fn test_independent_nodes_keep_declaration_order() {
        let graph = DependencyAnalyzer::analyze(&[vec![], vec![], vec![0, 1]], &[vec![0], vec![1], vec![]]);
        assert_eq!(graph.topological_sort().unwrap(), vec![0, 1, 2]);
        assert_eq!(graph.successors(0), &[2]);
    }

    #[test]
    fn test_reader_declared_before_writer() {
        let graph = DependencyAnalyzer::analyze(&[vec![0], vec![]], &[vec![], vec![0]]);
        assert_eq!(graph.topological_sort().unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_read_write_chain() {
        // 0 写入，1 读写，2 只读：2 读取 1 的结果
        let graph = DependencyAnalyzer::analyze(&[vec![], vec![0], vec![0]], &[vec![0], vec![0], vec![]]);
        assert!(graph.edges().iter().any(|e| e.producer == 1 && e.consumer == 2));
        assert!(!graph.edges().iter().any(|e| e.producer == 0 && e.consumer == 2));
        assert_eq!(graph.topological_sort().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_mutual_reads_form_cycle() {
        let graph = DependencyAnalyzer::analyze(&[vec![1], vec![0]], &[vec![0], vec![1]]);
        assert_eq!(graph.topological_sort().unwrap_err(), vec![0, 1]);
    }

    #[test]
    fn test_cycle() {
        let mut graph = DependencyGraph::new(3);
        graph.add_edge(0, 1, 0);
        graph.add_edge(1, 2, 1);
        graph.add_edge(2, 1, 2);
        assert_eq!(graph.topological_sort().unwrap_err(), vec![1, 2]);
    }
}
