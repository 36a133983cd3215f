// SPDX-License-Identifier: CEPL-1.0
//! Presentable image set lifecycle: `Empty -> Live -> Invalidated -> Live ...`
//!
//! Out-of-date and suboptimal results are control flow here, not errors. An
//! acquire that hits one rebuilds and retries before returning; a present
//! that hits one marks the set stale and the rebuild happens on the next
//! acquire.

use anyhow::{bail, Context, Result};
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::RenderSize;

pub const DEFAULT_IMAGE_COUNT: u32 = 3;

/// Failures callers may want to tell apart with `downcast_ref`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SwapchainError {
    #[error("Timed out waiting for a presentable image")]
    Timeout,
    #[error("Surface has a zero extent (window minimized?)")]
    ZeroExtent,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceCapabilities<T> {
    pub min_image_count: u32,
    /// `None` means no upper bound.
    pub max_image_count: Option<u32>,
    pub current_extent: RenderSize,
    pub current_transform: T,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainDesc<T> {
    pub image_count: u32,
    pub extent: RenderSize,
    pub transform: T,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireStatus {
    Acquired(u32),
    NotReady,
    Timeout,
    /// Out-of-date or suboptimal.
    Stale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentStatus {
    Presented,
    Stale,
}

/// The native calls the state machine drives. Hard failures come back as
/// `Err`; everything else is classified into the status enums.
pub trait PresentBackend {
    type Handle;
    type Image: Copy;
    type View: Copy;
    type Semaphore: Copy;
    type Fence: Copy;
    type Transform: Copy;

    fn surface_capabilities(&mut self) -> Result<SurfaceCapabilities<Self::Transform>>;

    /// `old` is a recreation hint only; the caller retires it afterwards.
    fn create_swapchain(
        &mut self,
        desc: &SwapchainDesc<Self::Transform>,
        old: Option<&Self::Handle>,
    ) -> Result<Self::Handle>;

    fn swapchain_images(&mut self, handle: &Self::Handle) -> Result<Vec<Self::Image>>;

    fn create_view(&mut self, image: Self::Image) -> Result<Self::View>;

    /// Destroys the views and the handle once nothing on the GPU uses them.
    fn retire(&mut self, handle: Self::Handle, views: Vec<Self::View>);

    fn acquire_next_image(
        &mut self,
        handle: &Self::Handle,
        timeout: u64,
        semaphore: Option<Self::Semaphore>,
        fence: Option<Self::Fence>,
    ) -> Result<AcquireStatus>;

    fn present(
        &mut self,
        handle: &Self::Handle,
        index: u32,
        wait: Option<Self::Semaphore>,
    ) -> Result<PresentStatus>;
}

/// What a successful acquire hands to the renderer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Frame<I, V> {
    pub index: u32,
    pub image: I,
    pub view: V,
    pub extent: RenderSize,
    /// Set on the first acquire after every rebuild, then cleared.
    pub extent_changed: bool,
}

pub type FrameOf<B> = Frame<<B as PresentBackend>::Image, <B as PresentBackend>::View>;

struct Live<B: PresentBackend> {
    handle: B::Handle,
    images: Vec<B::Image>,
    views: Vec<B::View>,
    extent: RenderSize,
    extent_changed: bool,
    acquired: Vec<bool>,
}

/// A stale swapchain kept only to be passed as the recreation hint.
struct Retired<B: PresentBackend> {
    handle: B::Handle,
    views: Vec<B::View>,
}

enum State<B: PresentBackend> {
    Empty,
    Live(Live<B>),
    Invalidated(Retired<B>),
}

pub struct Swapchain<B: PresentBackend> {
    backend: B,
    state: State<B>,
    desired_image_count: u32,
    generation: u64,
}

/// Prefer `desired`, clamped into `[min, max]`; a missing max is unbounded.
pub fn clamp_image_count(desired: u32, min: u32, max: Option<u32>) -> u32 {
    let count = desired.max(min);
    match max {
        Some(max) => count.min(max),
        None => count,
    }
}

impl<B: PresentBackend> Swapchain<B> {
    /// Starts in `Empty`; the first acquire builds the image set.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            state: State::Empty,
            desired_image_count: DEFAULT_IMAGE_COUNT,
            generation: 0,
        }
    }

    pub fn with_image_count(mut self, count: u32) -> Self {
        self.desired_image_count = count.max(1);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn is_live(&self) -> bool {
        matches!(self.state, State::Live(_))
    }

    pub fn extent(&self) -> Option<RenderSize> {
        match &self.state {
            State::Live(live) => Some(live.extent),
            _ => None,
        }
    }

    pub fn image_count(&self) -> usize {
        match &self.state {
            State::Live(live) => live.images.len(),
            _ => 0,
        }
    }

    /// Bumped on every rebuild.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Marks the live set stale. A no-op unless `Live`.
    pub fn invalidate(&mut self) {
        self.state = match std::mem::replace(&mut self.state, State::Empty) {
            State::Live(live) => State::Invalidated(Retired {
                handle: live.handle,
                views: live.views,
            }),
            other => other,
        };
    }

    /// Blocks up to `timeout` for the next image. Rebuilds first when not
    /// `Live`, and rebuilds and retries on stale results.
    pub fn acquire(
        &mut self,
        signal: Option<B::Semaphore>,
        fence: Option<B::Fence>,
        timeout: u64,
    ) -> Result<FrameOf<B>> {
        loop {
            if !self.is_live() {
                self.recreate().context("Recreate swapchain failed")?;
            }
            let State::Live(live) = &mut self.state else {
                continue;
            };

            let status = self
                .backend
                .acquire_next_image(&live.handle, timeout, signal, fence)
                .context("Acquire next swapchain image failed")?;

            match status {
                AcquireStatus::Acquired(index) => {
                    let i = index as usize;
                    let (Some(&image), Some(&view)) = (live.images.get(i), live.views.get(i))
                    else {
                        bail!(
                            "Swapchain returned image index {index} but has {} images",
                            live.images.len()
                        );
                    };
                    live.acquired[i] = true;
                    return Ok(Frame {
                        index,
                        image,
                        view,
                        extent: live.extent,
                        extent_changed: std::mem::take(&mut live.extent_changed),
                    });
                }
                AcquireStatus::NotReady => trace!("swapchain image not ready, polling again"),
                AcquireStatus::Timeout => return Err(SwapchainError::Timeout.into()),
                AcquireStatus::Stale => {
                    // A suboptimal acquire still took an image and left a
                    // signal pending on `signal`; the retry reuses it.
                    debug!("swapchain stale on acquire, rebuilding");
                    self.invalidate();
                }
            }
        }
    }

    /// Hands image `index` to the presentation engine.
    ///
    /// # Panics
    /// If the swapchain is not `Live`, or `index` was not acquired from the
    /// current image set.
    pub fn present(&mut self, index: u32, wait: Option<B::Semaphore>) -> Result<()> {
        let State::Live(live) = &mut self.state else {
            panic!("present({index}) without a live swapchain; acquire must succeed first");
        };
        let i = index as usize;
        assert!(
            live.acquired.get(i).copied().unwrap_or(false),
            "present({index}) of an image not acquired from swapchain generation {}",
            self.generation
        );
        live.acquired[i] = false;

        let status = self
            .backend
            .present(&live.handle, index, wait)
            .context("Present swapchain image failed")?;

        if status == PresentStatus::Stale {
            debug!("swapchain stale on present, rebuilding before next acquire");
            self.invalidate();
        }
        Ok(())
    }

    fn recreate(&mut self) -> Result<()> {
        let retired = match std::mem::replace(&mut self.state, State::Empty) {
            State::Live(live) => {
                self.state = State::Live(live);
                return Ok(());
            }
            State::Invalidated(retired) => Some(retired),
            State::Empty => None,
        };

        let built = self.build(retired.as_ref().map(|r| &r.handle));
        let hinted = retired.is_some();
        if let Some(retired) = retired {
            self.backend.retire(retired.handle, retired.views);
        }
        let live = built?;

        self.generation += 1;
        info!(
            "swapchain ready: {} images at {} (generation {}, hinted {})",
            live.images.len(),
            live.extent,
            self.generation,
            hinted
        );
        self.state = State::Live(live);
        Ok(())
    }

    fn build(&mut self, hint: Option<&B::Handle>) -> Result<Live<B>> {
        let caps = self
            .backend
            .surface_capabilities()
            .context("Query surface capabilities failed")?;
        if caps.current_extent.is_empty() {
            return Err(SwapchainError::ZeroExtent.into());
        }

        let desc = SwapchainDesc {
            image_count: clamp_image_count(
                self.desired_image_count,
                caps.min_image_count,
                caps.max_image_count,
            ),
            extent: caps.current_extent,
            transform: caps.current_transform,
        };
        let handle = self
            .backend
            .create_swapchain(&desc, hint)
            .context("Create swapchain failed")?;

        let images = match self.backend.swapchain_images(&handle) {
            Ok(images) => images,
            Err(e) => {
                self.backend.retire(handle, Vec::new());
                return Err(e.context("Get swapchain images failed"));
            }
        };

        let mut views = Vec::with_capacity(images.len());
        for &image in &images {
            match self.backend.create_view(image) {
                Ok(view) => views.push(view),
                Err(e) => {
                    self.backend.retire(handle, views);
                    return Err(e.context("Create swapchain image view failed"));
                }
            }
        }

        Ok(Live {
            handle,
            acquired: vec![false; images.len()],
            images,
            views,
            extent: desc.extent,
            extent_changed: true,
        })
    }
}

impl<B: PresentBackend> Drop for Swapchain<B> {
    fn drop(&mut self) {
        match std::mem::replace(&mut self.state, State::Empty) {
            State::Live(live) => self.backend.retire(live.handle, live.views),
            State::Invalidated(retired) => self.backend.retire(retired.handle, retired.views),
            State::Empty => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[derive(Default)]
    struct Log {
        created: Vec<(SwapchainDesc<()>, Option<u32>)>,
        retired: Vec<(u32, usize)>,
        views_alive: usize,
        acquires: usize,
        presents: usize,
    }

    /// In-memory surface driven by scripted native results.
    struct Scripted {
        extent: RenderSize,
        min_images: u32,
        max_images: Option<u32>,
        acquire_script: VecDeque<AcquireStatus>,
        present_script: VecDeque<PresentStatus>,
        fail_view_at: Option<usize>,
        fail_create: bool,
        fail_acquire: bool,
        fail_present: bool,
        next_handle: u32,
        images_per_handle: u32,
        cursor: u32,
        log: Rc<RefCell<Log>>,
    }

    impl Scripted {
        fn new(width: u32, height: u32) -> (Self, Rc<RefCell<Log>>) {
            let log = Rc::new(RefCell::new(Log::default()));
            let backend = Self {
                extent: RenderSize::new(width, height),
                min_images: 2,
                max_images: Some(8),
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                fail_view_at: None,
                fail_create: false,
                fail_acquire: false,
                fail_present: false,
                next_handle: 1,
                images_per_handle: 0,
                cursor: 0,
                log: log.clone(),
            };
            (backend, log)
        }
    }

    impl PresentBackend for Scripted {
        type Handle = u32;
        type Image = u32;
        type View = u32;
        type Semaphore = ();
        type Fence = ();
        type Transform = ();

        fn surface_capabilities(&mut self) -> Result<SurfaceCapabilities<()>> {
            Ok(SurfaceCapabilities {
                min_image_count: self.min_images,
                max_image_count: self.max_images,
                current_extent: self.extent,
                current_transform: (),
            })
        }

        fn create_swapchain(&mut self, desc: &SwapchainDesc<()>, old: Option<&u32>) -> Result<u32> {
            if self.fail_create {
                bail!("ERROR_NATIVE_WINDOW_IN_USE_KHR");
            }
            self.log.borrow_mut().created.push((*desc, old.copied()));
            self.images_per_handle = desc.image_count;
            self.cursor = 0;
            let handle = self.next_handle;
            self.next_handle += 1;
            Ok(handle)
        }

        fn swapchain_images(&mut self, handle: &u32) -> Result<Vec<u32>> {
            Ok((0..self.images_per_handle).map(|i| handle * 100 + i).collect())
        }

        fn create_view(&mut self, image: u32) -> Result<u32> {
            let mut log = self.log.borrow_mut();
            if self.fail_view_at == Some(log.views_alive) {
                bail!("out of device memory");
            }
            log.views_alive += 1;
            Ok(image + 10_000)
        }

        fn retire(&mut self, handle: u32, views: Vec<u32>) {
            let mut log = self.log.borrow_mut();
            log.views_alive -= views.len();
            log.retired.push((handle, views.len()));
        }

        fn acquire_next_image(
            &mut self,
            _handle: &u32,
            _timeout: u64,
            _semaphore: Option<()>,
            _fence: Option<()>,
        ) -> Result<AcquireStatus> {
            self.log.borrow_mut().acquires += 1;
            if self.fail_acquire {
                bail!("ERROR_DEVICE_LOST");
            }
            if let Some(status) = self.acquire_script.pop_front() {
                return Ok(status);
            }
            let index = self.cursor;
            self.cursor = (self.cursor + 1) % self.images_per_handle;
            Ok(AcquireStatus::Acquired(index))
        }

        fn present(&mut self, _handle: &u32, _index: u32, _wait: Option<()>) -> Result<PresentStatus> {
            self.log.borrow_mut().presents += 1;
            if self.fail_present {
                bail!("ERROR_SURFACE_LOST_KHR");
            }
            Ok(self
                .present_script
                .pop_front()
                .unwrap_or(PresentStatus::Presented))
        }
    }

    fn acquire(sc: &mut Swapchain<Scripted>) -> Result<FrameOf<Scripted>> {
        sc.acquire(None, None, u64::MAX)
    }

    #[test]
    fn image_count_prefers_three_within_bounds() {
        assert_eq!(clamp_image_count(3, 2, Some(8)), 3);
        assert_eq!(clamp_image_count(3, 4, Some(8)), 4);
        assert_eq!(clamp_image_count(3, 1, Some(2)), 2);
        assert_eq!(clamp_image_count(3, 1, None), 3);
        assert_eq!(clamp_image_count(3, 5, None), 5);
    }

    #[test]
    fn first_acquire_builds_and_reports_change_once() {
        let (backend, log) = Scripted::new(800, 600);
        let mut sc = Swapchain::new(backend);
        assert!(!sc.is_live());

        let first = acquire(&mut sc).unwrap();
        assert!(first.extent_changed);
        assert_eq!(first.extent, RenderSize::new(800, 600));
        assert_eq!(sc.image_count(), 3);
        assert_eq!(log.borrow().created.len(), 1);
        assert_eq!(log.borrow().created[0].1, None);

        sc.present(first.index, None).unwrap();
        let second = acquire(&mut sc).unwrap();
        assert!(!second.extent_changed);
        assert_eq!(log.borrow().created.len(), 1);
    }

    #[test]
    fn stale_acquire_is_absorbed_with_one_rebuild() {
        let (backend, log) = Scripted::new(800, 600);
        let mut sc = Swapchain::new(backend);
        let f = acquire(&mut sc).unwrap();
        sc.present(f.index, None).unwrap();
        let gen = sc.generation();

        sc.backend_mut().acquire_script.push_back(AcquireStatus::Stale);
        let frame = acquire(&mut sc).expect("stale must not surface as an error");
        assert!(frame.extent_changed);
        assert_eq!(sc.generation(), gen + 1);

        let log = log.borrow();
        assert_eq!(log.created.len(), 2);
        assert_eq!(log.created[1].1, Some(1), "old handle passed as hint");
        assert_eq!(log.retired, vec![(1, 3)]);
        assert_eq!(log.views_alive, 3);
    }

    #[test]
    fn stale_present_defers_rebuild_to_next_acquire() {
        let (backend, log) = Scripted::new(800, 600);
        let mut sc = Swapchain::new(backend);
        let f = acquire(&mut sc).unwrap();

        sc.backend_mut().present_script.push_back(PresentStatus::Stale);
        sc.present(f.index, None).expect("stale present is not an error");
        assert!(!sc.is_live());
        assert_eq!(log.borrow().created.len(), 1, "no eager rebuild");
        assert!(log.borrow().retired.is_empty(), "old set kept as hint");

        let next = acquire(&mut sc).unwrap();
        assert!(next.extent_changed);
        assert_eq!(log.borrow().created.len(), 2);
        assert_eq!(log.borrow().created[1].1, Some(1));
        assert_eq!(log.borrow().acquires, 2);
    }

    #[test]
    fn not_ready_is_polled_again() {
        let (mut backend, log) = Scripted::new(640, 480);
        backend.acquire_script.extend([AcquireStatus::NotReady, AcquireStatus::NotReady]);
        let mut sc = Swapchain::new(backend);
        let frame = acquire(&mut sc).unwrap();
        assert_eq!(frame.index, 0);
        assert_eq!(log.borrow().acquires, 3);
        assert_eq!(log.borrow().created.len(), 1);
    }

    #[test]
    fn timeout_is_reported_as_typed_error() {
        let (mut backend, _log) = Scripted::new(640, 480);
        backend.acquire_script.push_back(AcquireStatus::Timeout);
        let mut sc = Swapchain::new(backend);
        let err = sc.acquire(None, None, 1_000).unwrap_err();
        assert_eq!(
            err.downcast_ref::<SwapchainError>(),
            Some(&SwapchainError::Timeout)
        );
    }

    #[test]
    fn zero_extent_fails_until_surface_is_visible_again() {
        let (backend, log) = Scripted::new(0, 0);
        let mut sc = Swapchain::new(backend);
        let err = acquire(&mut sc).unwrap_err();
        assert_eq!(
            err.downcast_ref::<SwapchainError>(),
            Some(&SwapchainError::ZeroExtent)
        );
        assert!(log.borrow().created.is_empty());

        sc.backend_mut().extent = RenderSize::new(320, 200);
        let frame = acquire(&mut sc).unwrap();
        assert_eq!(frame.extent, RenderSize::new(320, 200));
    }

    #[test]
    fn failed_view_creation_releases_partial_set() {
        let (mut backend, log) = Scripted::new(800, 600);
        backend.fail_view_at = Some(2);
        let mut sc = Swapchain::new(backend);
        let err = acquire(&mut sc).unwrap_err();
        assert!(format!("{err:#}").contains("Create swapchain image view failed"));
        assert_eq!(log.borrow().retired, vec![(1, 2)]);
        assert_eq!(log.borrow().views_alive, 0);
        assert!(!sc.is_live());
    }

    #[test]
    fn hard_acquire_failure_propagates_and_keeps_the_set() {
        let (backend, log) = Scripted::new(800, 600);
        let mut sc = Swapchain::new(backend);
        let f = acquire(&mut sc).unwrap();
        sc.present(f.index, None).unwrap();

        sc.backend_mut().fail_acquire = true;
        let err = acquire(&mut sc).unwrap_err();
        let chain = format!("{err:#}");
        assert!(chain.contains("Acquire next swapchain image failed"), "{chain}");
        assert!(chain.contains("ERROR_DEVICE_LOST"), "{chain}");
        assert!(sc.is_live());
        assert_eq!(log.borrow().created.len(), 1);
        assert!(log.borrow().retired.is_empty());
    }

    #[test]
    fn hard_present_failure_propagates_without_invalidating() {
        let (backend, log) = Scripted::new(800, 600);
        let mut sc = Swapchain::new(backend);
        let f = acquire(&mut sc).unwrap();

        sc.backend_mut().fail_present = true;
        let err = sc.present(f.index, None).unwrap_err();
        let chain = format!("{err:#}");
        assert!(chain.contains("Present swapchain image failed"), "{chain}");
        assert!(chain.contains("ERROR_SURFACE_LOST_KHR"), "{chain}");
        assert!(sc.is_live());
        assert_eq!(sc.generation(), 1);
        assert!(log.borrow().retired.is_empty());
    }

    #[test]
    fn failed_recreation_still_retires_the_hint() {
        let (backend, log) = Scripted::new(800, 600);
        let mut sc = Swapchain::new(backend);
        let f = acquire(&mut sc).unwrap();
        sc.present(f.index, None).unwrap();
        sc.invalidate();

        sc.backend_mut().fail_create = true;
        let err = acquire(&mut sc).unwrap_err();
        let chain = format!("{err:#}");
        assert!(chain.contains("Recreate swapchain failed"), "{chain}");
        assert!(chain.contains("Create swapchain failed"), "{chain}");
        assert!(!sc.is_live());
        assert_eq!(log.borrow().retired, vec![(1, 3)]);
        assert_eq!(log.borrow().views_alive, 0);

        // Empty now, so the next build has no hint.
        sc.backend_mut().fail_create = false;
        acquire(&mut sc).unwrap();
        let log = log.borrow();
        assert_eq!(log.created.len(), 2);
        assert_eq!(log.created[1].1, None);
    }

    #[test]
    fn drop_retires_live_and_stale_sets() {
        let (backend, log) = Scripted::new(800, 600);
        let mut sc = Swapchain::new(backend);
        acquire(&mut sc).unwrap();
        drop(sc);
        assert_eq!(log.borrow().retired, vec![(1, 3)]);

        let (backend, log) = Scripted::new(800, 600);
        let mut sc = Swapchain::new(backend);
        acquire(&mut sc).unwrap();
        sc.invalidate();
        drop(sc);
        assert_eq!(log.borrow().retired, vec![(1, 3)]);
        assert_eq!(log.borrow().views_alive, 0);
    }

    #[test]
    #[should_panic(expected = "without a live swapchain")]
    fn present_without_acquire_is_a_defect() {
        let (backend, _log) = Scripted::new(800, 600);
        let mut sc = Swapchain::new(backend);
        let _ = sc.present(0, None);
    }

    #[test]
    #[should_panic(expected = "not acquired")]
    fn present_of_unacquired_index_is_a_defect() {
        let (backend, _log) = Scripted::new(800, 600);
        let mut sc = Swapchain::new(backend);
        let frame = acquire(&mut sc).unwrap();
        let _ = sc.present(frame.index + 1, None);
    }

    #[test]
    fn resize_then_stale_acquire_reports_new_extent() {
        use crate::candidate::{fixture, DeviceKind};
        use crate::features::FeatureRequest;
        use crate::select::select_device;

        let devices = [
            fixture("igpu", DeviceKind::Integrated, 16 * 1024),
            fixture("dgpu", DeviceKind::Discrete, 8 * 1024),
        ];
        let chosen = select_device(devices, &FeatureRequest::default()).unwrap();
        assert_eq!(chosen.candidate.name, "dgpu");

        let (backend, log) = Scripted::new(800, 600);
        let mut sc = Swapchain::new(backend);

        let first = acquire(&mut sc).unwrap();
        assert!(first.extent_changed);
        assert_eq!(first.extent, RenderSize::new(800, 600));
        sc.present(first.index, None).unwrap();

        sc.backend_mut().extent = RenderSize::new(1024, 768);
        sc.backend_mut().acquire_script.push_back(AcquireStatus::Stale);

        let resized = acquire(&mut sc).unwrap();
        assert!(resized.extent_changed);
        assert_eq!(resized.extent, RenderSize::new(1024, 768));
        assert_eq!(log.borrow().created[1].0.extent, RenderSize::new(1024, 768));
        sc.present(resized.index, None).unwrap();

        let steady = acquire(&mut sc).unwrap();
        assert!(!steady.extent_changed);
    }
}
