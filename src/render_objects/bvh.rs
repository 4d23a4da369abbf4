use std::{
    fs::File,
    io::{self, BufWriter, Write},
    ops::Range,
    path::Path,
};

use tracing::{debug, info};

use crate::constants::{LINEAR_SCAN_THRESHOLD, SAH_BUCKETS};
use crate::primatives::*;

use super::{Hit, Hittable};

#[derive(Clone, Copy, Debug)]
pub struct BvhNode {
    pub bbox: Aabb,
    /// First primitive of this node's run in the owning BVH's primitive array.
    pub start: usize,
    pub size: usize,
    /// Left and right child node indices. `None` marks a leaf.
    pub children: Option<(usize, usize)>,
}

impl BvhNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.start + self.size
    }
}

#[derive(Clone, Copy, Default)]
struct Bucket {
    bounds: Aabb,
    count: usize,
}

/// Bounding volume hierarchy over an owned primitive array.
///
/// Nodes live in a flat array with the root at index 0 and every node covering
/// a contiguous run of `primitives`. The tree is frozen once [`Bvh::build`]
/// returns; only [`Bvh::destructure`] and [`Bvh::clear`] modify it afterwards.
#[derive(Clone, Debug)]
pub struct Bvh<P> {
    primitives: Vec<P>,
    nodes: Vec<BvhNode>,
}

impl<P> Default for Bvh<P> {
    fn default() -> Self {
        Self {
            primitives: Vec::new(),
            nodes: Vec::new(),
        }
    }
}

impl<P: Hittable> Bvh<P> {
    /// Builds a binned-SAH tree over `primitives`, reordering them in place.
    ///
    /// A node holding at most `max_leaf_size` primitives stays a leaf; anything
    /// larger is split. A leaf size of zero is treated as one.
    pub fn build(primitives: Vec<P>, max_leaf_size: usize) -> Self {
        let max_leaf_size = max_leaf_size.max(1);
        let mut bvh = Self {
            primitives,
            nodes: Vec::new(),
        };

        let mut bbox = Aabb::empty();
        for primitive in bvh.primitives.iter() {
            bbox.enclose(&primitive.bbox());
        }
        let root = bvh.new_node(bbox, 0, bvh.primitives.len());

        let mut remaining_nodes = vec![root];
        while let Some(parent) = remaining_nodes.pop() {
            if bvh.nodes[parent].size <= max_leaf_size {
                continue;
            }

            let (left, right) = bvh.split_node(parent);
            bvh.nodes[parent].children = Some((left, right));

            for child in [left, right] {
                if bvh.nodes[child].size > max_leaf_size {
                    remaining_nodes.push(child);
                }
            }
        }

        debug!(
            primitives = bvh.primitives.len(),
            nodes = bvh.nodes.len(),
            leaves = bvh.nodes.iter().filter(|n| n.is_leaf()).count(),
            depth = bvh.depth(),
            "Built BVH"
        );
        bvh
    }

    fn new_node(&mut self, bbox: Aabb, start: usize, size: usize) -> usize {
        self.nodes.push(BvhNode {
            bbox,
            start,
            size,
            children: None,
        });
        self.nodes.len() - 1
    }

    /// Partitions a node's primitives into two non-empty runs and appends the
    /// child nodes covering them.
    fn split_node(&mut self, idx: usize) -> (usize, usize) {
        let node = self.nodes[idx];
        let axis = node.bbox.largest_axis();

        let (left_count, left_bbox, right_bbox) = match self.bucket_split(&node, axis) {
            Some(split) => split,
            None => self.median_split(&node, axis),
        };

        let left = self.new_node(left_bbox, node.start, left_count);
        let right = self.new_node(right_bbox, node.start + left_count, node.size - left_count);
        (left, right)
    }

    /// SAH search over equal-width centroid buckets along `axis`.
    ///
    /// Returns `None` when no candidate split leaves both sides non-empty,
    /// which happens when the node is flat along `axis` or every centroid
    /// lands in the same bucket.
    fn bucket_split(&mut self, node: &BvhNode, axis: usize) -> Option<(usize, Aabb, Aabb)> {
        let split_min = node.bbox.min[axis];
        let split_len = node.bbox.extent()[axis];
        if !(split_len > 0.0 && split_len.is_finite()) {
            return None;
        }

        // Negative offsets and NaN saturate to bucket 0; the right boundary
        // clamps into the last bucket.
        let bucket_of = |bbox: &Aabb| -> usize {
            let offset = (bbox.center()[axis] - split_min) / split_len;
            ((offset * SAH_BUCKETS as f32) as usize).min(SAH_BUCKETS - 1)
        };

        let mut buckets = [Bucket::default(); SAH_BUCKETS];
        for primitive in self.primitives[node.range()].iter() {
            let bbox = primitive.bbox();
            let bucket = &mut buckets[bucket_of(&bbox)];
            bucket.count += 1;
            bucket.bounds.enclose(&bbox);
        }

        // left[k] covers buckets [0, k), right[k] covers buckets [k, SAH_BUCKETS).
        let mut left = [Bucket::default(); SAH_BUCKETS];
        let mut right = [Bucket::default(); SAH_BUCKETS];
        for k in 1..SAH_BUCKETS {
            left[k].bounds = left[k - 1].bounds.union(&buckets[k - 1].bounds);
            left[k].count = left[k - 1].count + buckets[k - 1].count;
        }
        right[SAH_BUCKETS - 1] = buckets[SAH_BUCKETS - 1];
        for k in (1..SAH_BUCKETS - 1).rev() {
            right[k].bounds = right[k + 1].bounds.union(&buckets[k].bounds);
            right[k].count = right[k + 1].count + buckets[k].count;
        }

        let mut best: Option<(usize, f32)> = None;
        for k in 1..SAH_BUCKETS {
            if left[k].count == 0 || right[k].count == 0 {
                continue;
            }
            let cost = left[k].bounds.surface_area() * left[k].count as f32
                + right[k].bounds.surface_area() * right[k].count as f32;
            if best.map_or(true, |(_, best_cost)| cost < best_cost) {
                best = Some((k, cost));
            }
        }
        let (k, _) = best?;

        // Stable sort keeps bucket order and each bucket's original order.
        self.primitives[node.range()]
            .sort_by_cached_key(|primitive| bucket_of(&primitive.bbox()));

        Some((left[k].count, left[k].bounds, right[k].bounds))
    }

    /// Fallback split at the median centroid along `axis`.
    fn median_split(&mut self, node: &BvhNode, axis: usize) -> (usize, Aabb, Aabb) {
        let primitives = &mut self.primitives[node.range()];
        primitives.sort_by(|a, b| {
            a.bbox().center()[axis].total_cmp(&b.bbox().center()[axis])
        });

        let left_count = primitives.len() / 2;
        let enclose_all = |run: &[P]| {
            run.iter()
                .fold(Aabb::empty(), |bbox, primitive| bbox.union(&primitive.bbox()))
        };
        let left_bbox = enclose_all(&primitives[..left_count]);
        let right_bbox = enclose_all(&primitives[left_count..]);
        (left_count, left_bbox, right_bbox)
    }

    /// Entry time of `ray` into node `idx`'s box, if it enters at all.
    fn entry_time(&self, ray: &Ray, idx: usize) -> Option<f32> {
        let mut times = ray.time_bounds;
        self.nodes[idx]
            .bbox
            .hit(ray, &mut times)
            .then_some(times[0])
    }

    fn find_closest_hit(&self, ray: &Ray, idx: usize) -> Option<Hit> {
        let node = &self.nodes[idx];

        let Some((left, right)) = node.children else {
            return self.primitives[node.range()]
                .iter()
                .map(|primitive| primitive.hit(ray))
                .fold(None, Hit::nearest);
        };

        match (self.entry_time(ray, left), self.entry_time(ray, right)) {
            (None, None) => None,
            (Some(_), None) => self.find_closest_hit(ray, left),
            (None, Some(_)) => self.find_closest_hit(ray, right),
            (Some(left_t), Some(right_t)) => {
                let (first, second, second_t) = if left_t <= right_t {
                    (left, right, right_t)
                } else {
                    (right, left, left_t)
                };

                let hit = self.find_closest_hit(ray, first);
                match hit {
                    // Nothing in the farther box can beat a hit in front of it.
                    Some(found) if found.t < second_t => hit,
                    _ => Hit::nearest(hit, self.find_closest_hit(ray, second)),
                }
            }
        }
    }

    /// Number of nodes on the longest root-to-leaf path.
    pub fn depth(&self) -> usize {
        if self.nodes.is_empty() {
            return 0;
        }

        let mut max_depth = 0;
        let mut stack = vec![(0usize, 1usize)];
        while let Some((idx, depth)) = stack.pop() {
            max_depth = max_depth.max(depth);
            if let Some((left, right)) = self.nodes[idx].children {
                stack.push((left, depth + 1));
                stack.push((right, depth + 1));
            }
        }
        max_depth
    }
}

impl<P> Bvh<P> {
    pub fn nodes(&self) -> &[BvhNode] {
        &self.nodes
    }

    pub fn primitives(&self) -> &[P] {
        &self.primitives
    }

    pub fn len(&self) -> usize {
        self.primitives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primitives.is_empty()
    }

    /// Hands back the primitives (in tree order) and leaves an empty tree.
    pub fn destructure(&mut self) -> Vec<P> {
        self.nodes.clear();
        std::mem::take(&mut self.primitives)
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.primitives.clear();
    }

    /// Writes every leaf box as an OBJ wireframe with quad faces.
    pub fn dump_obj(&self, file: &Path) -> io::Result<()> {
        info!("Writing BVH to `{}`", file.display());
        let mut f = BufWriter::new(File::create(file)?);

        let leaves: Vec<&BvhNode> = self.nodes.iter().filter(|node| node.is_leaf()).collect();

        for node in leaves.iter() {
            for corner in node.bbox.corners() {
                writeln!(f, "v {:0.6} {:0.6} {:0.6}", corner.x, corner.y, corner.z)?;
            }
        }

        for n in 0..leaves.len() {
            for (a, b) in [
                (0, 1),
                (0, 2),
                (0, 4),
                (7, 3),
                (7, 5),
                (7, 6),
                (1, 5),
                (5, 4),
                (4, 6),
                (6, 2),
                (2, 3),
                (3, 1),
            ] {
                writeln!(f, "l {} {}", 1 + n * 8 + a, 1 + n * 8 + b)?;
            }
        }

        for n in 0..leaves.len() {
            for (u, v) in [(1, 2), (2, 4), (4, 1)] {
                let i = 1 + n * 8;
                writeln!(f, "f {} {} {} {}", i, i + u, i + u + v, i + v)?;
                let i = n * 8 + 8;
                writeln!(f, "f {} {} {} {}", i, i - u, i - u - v, i - v)?;
            }
        }

        f.flush()?;
        info!("BVH written, {} leaf boxes", leaves.len());
        Ok(())
    }
}

impl<P: Hittable> Hittable for Bvh<P> {
    fn bbox(&self) -> Aabb {
        self.nodes.first().map(|root| root.bbox).unwrap_or_default()
    }

    fn hit(&self, ray: &Ray) -> Option<Hit> {
        if self.primitives.len() < LINEAR_SCAN_THRESHOLD || self.nodes.is_empty() {
            return self
                .primitives
                .iter()
                .map(|primitive| primitive.hit(ray))
                .fold(None, Hit::nearest);
        }

        self.entry_time(ray, 0)?;
        self.find_closest_hit(ray, 0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use approx::assert_abs_diff_eq;
    use ultraviolet::Vec3;

    use super::*;

    fn random_vec(rng: &fastrand::Rng, scale: f32) -> Vec3 {
        Vec3::new(
            (rng.f32() * 2.0 - 1.0) * scale,
            (rng.f32() * 2.0 - 1.0) * scale,
            (rng.f32() * 2.0 - 1.0) * scale,
        )
    }

    /// Triangle soup of small triangles scattered through a 4x4x4 cube.
    fn triangle_soup(count: usize, seed: u64) -> Vec<Triangle> {
        let rng = fastrand::Rng::with_seed(seed);
        let mut vertices = Vec::with_capacity(count * 3);
        for _ in 0..count {
            let center = random_vec(&rng, 2.0);
            for _ in 0..3 {
                vertices.push(MeshVertex::new(center + random_vec(&rng, 0.3), Vec3::unit_y()));
            }
        }
        let vertices: Arc<[MeshVertex]> = Arc::from(vertices);
        (0..count as u32)
            .map(|i| Triangle::new(vertices.clone(), [3 * i, 3 * i + 1, 3 * i + 2]))
            .collect()
    }

    fn random_rays(count: usize, seed: u64) -> Vec<Ray> {
        let rng = fastrand::Rng::with_seed(seed);
        (0..count)
            .map(|_| {
                let origin = random_vec(&rng, 1.0).normalized() * 6.0;
                let target = random_vec(&rng, 2.0);
                Ray::new(origin, target - origin)
            })
            .collect()
    }

    fn brute_force(primitives: &[Triangle], ray: &Ray) -> Option<Hit> {
        primitives
            .iter()
            .map(|primitive| primitive.hit(ray))
            .fold(None, Hit::nearest)
    }

    fn assert_matches_brute_force(bvh: &Bvh<Triangle>, rays: &[Ray]) {
        let mut hits = 0;
        for ray in rays {
            let expected = brute_force(bvh.primitives(), ray);
            let actual = bvh.hit(ray);
            match (expected, actual) {
                (Some(e), Some(a)) => {
                    assert_abs_diff_eq!(e.t, a.t, epsilon = 1e-4);
                    hits += 1;
                }
                (None, None) => {}
                (e, a) => panic!("BVH disagrees with linear scan: {e:?} vs {a:?}"),
            }
        }
        assert!(hits > 0, "test rays should hit something");
    }

    fn union_of(primitives: &[Triangle]) -> Aabb {
        primitives
            .iter()
            .fold(Aabb::empty(), |bbox, p| bbox.union(&p.bbox()))
    }

    #[test]
    fn test_bvh_matches_brute_force() {
        let rays = random_rays(500, 11);
        for leaf_size in [1, 4, 16] {
            let bvh = Bvh::build(triangle_soup(300, 3), leaf_size);
            assert!(bvh.nodes().len() > 1);
            assert_matches_brute_force(&bvh, &rays);
        }
    }

    #[test]
    fn test_bvh_respects_time_bounds() {
        let bvh = Bvh::build(triangle_soup(300, 5), 4);
        for ray in random_rays(200, 9) {
            let bounded = ray.with_time_bounds(0.0, 0.8);
            let expected = brute_force(bvh.primitives(), &bounded).map(|h| h.t);
            let actual = bvh.hit(&bounded).map(|h| h.t);
            assert_eq!(expected.is_some(), actual.is_some());
            if let (Some(e), Some(a)) = (expected, actual) {
                assert_abs_diff_eq!(e, a, epsilon = 1e-4);
                assert!(a < 0.8);
            }
        }
    }

    #[test]
    fn test_ray_along_node_boundary_with_negative_zero() {
        // A strip of triangles in z = 0 whose left edges all sit on x = 0.
        let mut vertices = Vec::new();
        for i in 0..10 {
            let y = 0.1 * i as f32;
            for position in [
                Vec3::new(0.0, y, 0.0),
                Vec3::new(0.5, y, 0.0),
                Vec3::new(0.0, y + 0.1, 0.0),
            ] {
                vertices.push(MeshVertex::new(position, -Vec3::unit_z()));
            }
        }
        let vertices: Arc<[MeshVertex]> = Arc::from(vertices);
        let triangles = (0..10u32)
            .map(|i| Triangle::new(vertices.clone(), [3 * i, 3 * i + 1, 3 * i + 2]))
            .collect();
        let bvh = Bvh::build(triangles, 2);
        assert_eq!(bvh.bbox().min.x, 0.0);

        for direction in [Vec3::new(0.0, 0.0, 1.0), Vec3::new(-0.0, 0.0, 1.0)] {
            let ray = Ray::new(Vec3::new(0.0, 0.55, -1.0), direction);
            let expected = brute_force(bvh.primitives(), &ray).expect("edge hit");
            let actual = bvh.hit(&ray).expect("bvh should agree with the scan");
            assert_abs_diff_eq!(expected.t, actual.t, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_root_bbox_is_union() {
        let bvh = Bvh::build(triangle_soup(100, 1), 4);
        assert_eq!(bvh.bbox(), union_of(bvh.primitives()));
    }

    #[test]
    fn test_node_invariants() {
        let max_leaf_size = 4;
        let bvh = Bvh::build(triangle_soup(257, 2), max_leaf_size);
        let nodes = bvh.nodes();

        let mut covered = 0;
        for node in nodes {
            let contained = union_of(&bvh.primitives()[node.range()]);
            assert_eq!(node.bbox.union(&contained), node.bbox);

            match node.children {
                None => {
                    assert!(node.size <= max_leaf_size);
                    covered += node.size;
                }
                Some((left, right)) => {
                    let (l, r) = (&nodes[left], &nodes[right]);
                    assert_ne!(left, 0);
                    assert_ne!(right, 0);
                    assert_eq!(l.bbox.union(&r.bbox), node.bbox);
                    assert_eq!(l.start, node.start);
                    assert_eq!(r.start, l.start + l.size);
                    assert_eq!(l.size + r.size, node.size);
                    assert!(l.size > 0 && r.size > 0);
                }
            }
        }
        assert_eq!(covered, bvh.len());
    }

    #[test]
    fn test_empty_bvh() {
        let bvh: Bvh<Triangle> = Bvh::build(Vec::new(), 4);
        assert_eq!(bvh.nodes().len(), 1);
        assert!(bvh.nodes()[0].is_leaf());
        assert!(bvh.bbox().is_empty());
        for ray in random_rays(10, 4) {
            assert!(bvh.hit(&ray).is_none());
        }
    }

    #[test]
    fn test_single_primitive_bvh() {
        let bvh = Bvh::build(triangle_soup(1, 8), 4);
        assert_eq!(bvh.nodes().len(), 1);
        assert_eq!(bvh.bbox(), union_of(bvh.primitives()));

        let target = bvh.bbox().center();
        let ray = Ray::new(target + Vec3::new(0.0, 5.0, 0.0), -Vec3::unit_y());
        assert_eq!(
            bvh.hit(&ray).map(|h| h.t),
            brute_force(bvh.primitives(), &ray).map(|h| h.t)
        );
    }

    #[test]
    fn test_coincident_primitives_terminate() {
        let n = Vec3::unit_z();
        let vertices: Arc<[MeshVertex]> = Arc::from(vec![
            MeshVertex::new(Vec3::new(0.0, 0.0, 0.0), n),
            MeshVertex::new(Vec3::new(1.0, 0.0, 0.0), n),
            MeshVertex::new(Vec3::new(0.0, 1.0, 0.0), n),
        ]);
        let triangles = (0..50)
            .map(|_| Triangle::new(vertices.clone(), [0, 1, 2]))
            .collect();

        let bvh = Bvh::build(triangles, 4);
        assert!(bvh.nodes().iter().filter(|n| n.is_leaf()).all(|n| n.size <= 4));

        let ray = Ray::new(Vec3::new(0.25, 0.25, 1.0), -Vec3::unit_z());
        let hit = bvh.hit(&ray).unwrap();
        assert_abs_diff_eq!(hit.t, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_one_large_primitive_among_small() {
        // Most centroids fall into one bucket next to a huge outlier.
        let mut triangles = triangle_soup(40, 6);
        let n = Vec3::unit_y();
        let big: Arc<[MeshVertex]> = Arc::from(vec![
            MeshVertex::new(Vec3::new(-100.0, -3.0, -100.0), n),
            MeshVertex::new(Vec3::new(100.0, -3.0, -100.0), n),
            MeshVertex::new(Vec3::new(0.0, -3.0, 100.0), n),
        ]);
        triangles.push(Triangle::new(big, [0, 1, 2]));

        let bvh = Bvh::build(triangles, 2);
        assert_matches_brute_force(&bvh, &random_rays(300, 12));
    }

    #[test]
    fn test_destructure_and_clear() {
        let mut bvh = Bvh::build(triangle_soup(20, 7), 4);
        let primitives = bvh.destructure();
        assert_eq!(primitives.len(), 20);
        assert!(bvh.is_empty());
        assert!(bvh.nodes().is_empty());
        assert!(bvh.bbox().is_empty());

        let mut bvh = Bvh::build(primitives, 4);
        bvh.clear();
        assert!(bvh.is_empty());
        for ray in random_rays(10, 4) {
            assert!(bvh.hit(&ray).is_none());
        }
    }

    #[test]
    fn test_dump_obj() {
        let bvh = Bvh::build(triangle_soup(64, 10), 4);
        let leaves = bvh.nodes().iter().filter(|n| n.is_leaf()).count();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bvh.obj");
        bvh.dump_obj(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let count = |prefix: &str| contents.lines().filter(|l| l.starts_with(prefix)).count();
        assert_eq!(count("v "), leaves * 8);
        assert_eq!(count("l "), leaves * 12);
        assert_eq!(count("f "), leaves * 6);
    }
}
