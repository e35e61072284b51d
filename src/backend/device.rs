// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with validation layers
// - Window surface creation
// - Physical device selection (prefer discrete GPU that can present)
// - Logical device + one queue per graphics/compute/transfer family
// - Memory allocator setup
// - The RawDevice implementation every backend object calls through

use super::queue::{QueueFamily, QueueSet};
use super::raw::{RawDevice, SwapchainImages};
use crate::types::{QueueUsage, SwapchainInfo};
use anyhow::{bail, Context, Result};
use ash::extensions::{ext, khr};
use ash::prelude::VkResult;
use ash::{vk, Entry};
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use std::ffi::{c_void, CStr, CString};
use std::mem::ManuallyDrop;
use std::sync::Arc;

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    // Dropped by hand before the device it allocates from
    allocator: ManuallyDrop<Mutex<Allocator>>,
    device: ash::Device,
    swapchain_loader: khr::Swapchain,
    surface: vk::SurfaceKHR,
    surface_loader: khr::Surface,
    physical_device: vk::PhysicalDevice,
    instance: ash::Instance,
    _entry: Entry,

    queues: QueueSet,

    // Debug utils (if validation enabled)
    debug_utils: Option<(ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,

    // Device properties (cached)
    properties: vk::PhysicalDeviceProperties,
}

/// What the physical-device pass found
struct Selection {
    physical_device: vk::PhysicalDevice,
    families: Vec<(u32, QueueUsage, bool)>,
    features: vk::PhysicalDeviceFeatures,
}

impl VulkanDevice {
    /// Create Vulkan device presenting to `window`
    ///
    /// # Arguments
    /// * `app_name` - Application name for debugging
    /// * `enable_validation` - Enable Vulkan validation layers (debug only)
    pub fn new<W>(window: &W, app_name: &str, enable_validation: bool) -> Result<Arc<Self>>
    where
        W: HasWindowHandle + HasDisplayHandle,
    {
        log::info!("Creating Vulkan device: {}", app_name);

        let display = window.display_handle().context("Window has no display handle")?.as_raw();
        let window = window.window_handle().context("Window has no window handle")?.as_raw();

        // Step 1: Load Vulkan library
        let entry = unsafe { Entry::load() }.context("Failed to load Vulkan library. Is Vulkan installed?")?;

        // Step 2: Create instance
        let instance = Self::create_instance(&entry, display, app_name, enable_validation)?;

        // Step 3: Setup debug messenger if validation enabled
        let debug_utils = if enable_validation {
            match Self::setup_debug_messenger(&entry, &instance) {
                Ok(debug) => Some(debug),
                Err(e) => {
                    log::warn!("Validation requested but debug messenger failed: {:?}", e);
                    None
                }
            }
        } else {
            None
        };

        // Step 4: Surface
        let surface_loader = khr::Surface::new(&entry, &instance);
        let surface = Self::create_surface(&entry, &instance, display, window)?;

        // Step 5: Pick physical device (GPU)
        let selection = Self::pick_physical_device(&instance, &surface_loader, surface)?;
        let physical_device = selection.physical_device;

        // Step 6: Create logical device
        let (device, queues) = Self::create_logical_device(&instance, &selection)?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        // Step 7: Create memory allocator
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .context("Failed to create memory allocator")?;

        let swapchain_loader = khr::Swapchain::new(&instance, &device);

        Ok(Arc::new(Self {
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            device,
            swapchain_loader,
            surface,
            surface_loader,
            physical_device,
            instance,
            _entry: entry,
            queues,
            debug_utils,
            properties,
        }))
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    fn create_instance(
        entry: &Entry,
        display: RawDisplayHandle,
        app_name: &str,
        enable_validation: bool,
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name)?;
        let engine_name = CString::new("stash-render")?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_2);

        let mut extensions = vec![khr::Surface::name().as_ptr()];
        extensions.push(match display {
            RawDisplayHandle::Windows(_) => khr::Win32Surface::name().as_ptr(),
            RawDisplayHandle::Xlib(_) => khr::XlibSurface::name().as_ptr(),
            RawDisplayHandle::Xcb(_) => khr::XcbSurface::name().as_ptr(),
            RawDisplayHandle::Wayland(_) => khr::WaylandSurface::name().as_ptr(),
            other => bail!("Unsupported display platform: {:?}", other),
        });
        if enable_validation {
            extensions.push(ext::DebugUtils::name().as_ptr());
        }

        // Validation layers
        let layer_names = if enable_validation {
            vec![c"VK_LAYER_KHRONOS_validation".as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance =
            unsafe { entry.create_instance(&create_info, None) }.context("Failed to create Vulkan instance")?;

        Ok(instance)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ext::DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }?;

        Ok((debug_utils, messenger))
    }

    fn create_surface(
        entry: &Entry,
        instance: &ash::Instance,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> Result<vk::SurfaceKHR> {
        let surface = match (display, window) {
            (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(handle)) => {
                let info = vk::Win32SurfaceCreateInfoKHR::builder()
                    .hinstance(handle.hinstance.map_or(std::ptr::null(), |h| h.get() as *const c_void))
                    .hwnd(handle.hwnd.get() as *const c_void);
                unsafe { khr::Win32Surface::new(entry, instance).create_win32_surface(&info, None) }
            }
            (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(handle)) => {
                let dpy = display.display.map_or(std::ptr::null_mut(), |d| d.as_ptr());
                let info = vk::XlibSurfaceCreateInfoKHR::builder()
                    .dpy(dpy as *mut vk::Display)
                    .window(handle.window as vk::Window);
                unsafe { khr::XlibSurface::new(entry, instance).create_xlib_surface(&info, None) }
            }
            (RawDisplayHandle::Xcb(display), RawWindowHandle::Xcb(handle)) => {
                let connection = display.connection.map_or(std::ptr::null_mut(), |c| c.as_ptr());
                let info = vk::XcbSurfaceCreateInfoKHR::builder()
                    .connection(connection as *mut vk::xcb_connection_t)
                    .window(handle.window.get());
                unsafe { khr::XcbSurface::new(entry, instance).create_xcb_surface(&info, None) }
            }
            (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(handle)) => {
                let info = vk::WaylandSurfaceCreateInfoKHR::builder()
                    .display(display.display.as_ptr() as *mut vk::wl_display)
                    .surface(handle.surface.as_ptr() as *mut vk::wl_surface);
                unsafe { khr::WaylandSurface::new(entry, instance).create_wayland_surface(&info, None) }
            }
            (display, window) => bail!("Unsupported window platform: {:?} / {:?}", display, window),
        };
        surface.context("Failed to create window surface")
    }

    fn pick_physical_device(
        instance: &ash::Instance,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
    ) -> Result<Selection> {
        let devices = unsafe { instance.enumerate_physical_devices() }?;

        if devices.is_empty() {
            bail!("No Vulkan-capable GPU found");
        }

        // Score each device
        let mut best = None;
        let mut best_score = 0;

        for device in devices {
            let props = unsafe { instance.get_physical_device_properties(device) };
            let features = unsafe { instance.get_physical_device_features(device) };

            if features.sampler_anisotropy != vk::TRUE {
                continue;
            }

            let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };
            let families: Vec<_> = queue_families
                .iter()
                .enumerate()
                .map(|(index, family)| {
                    let index = index as u32;
                    let presentable = unsafe {
                        surface_loader.get_physical_device_surface_support(device, index, surface)
                    }
                    .unwrap_or(false);
                    (index, queue_usage(family.queue_flags), presentable)
                })
                .collect();

            let can_present = families
                .iter()
                .any(|(_, usage, presentable)| *presentable && usage.contains(QueueUsage::GRAPHICS));
            if !can_present {
                continue;
            }

            // Score device (prefer discrete GPU)
            let score = match props.device_type {
                vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
                vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
                _ => 1,
            };

            if score > best_score {
                best_score = score;
                best = Some(Selection {
                    physical_device: device,
                    families,
                    features,
                });
            }
        }

        best.context("No suitable GPU found")
    }

    fn create_logical_device(instance: &ash::Instance, selection: &Selection) -> Result<(ash::Device, QueueSet)> {
        let families = &selection.families;
        let graphics = families
            .iter()
            .find(|(_, usage, presentable)| *presentable && usage.contains(QueueUsage::GRAPHICS))
            .context("No presentable graphics queue family")?;
        // Dedicated families let compute and uploads run beside graphics
        let compute = families
            .iter()
            .find(|(_, usage, _)| usage.contains(QueueUsage::COMPUTE) && !usage.contains(QueueUsage::GRAPHICS));
        let transfer = families.iter().find(|(_, usage, _)| {
            usage.contains(QueueUsage::TRANSFER) && !usage.intersects(QueueUsage::GRAPHICS | QueueUsage::COMPUTE)
        });

        let chosen: Vec<_> = std::iter::once(graphics).chain(compute).chain(transfer).copied().collect();

        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = chosen
            .iter()
            .map(|(index, _, _)| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(*index)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions = [khr::Swapchain::name().as_ptr()];

        let supported = &selection.features;
        let features = vk::PhysicalDeviceFeatures {
            sampler_anisotropy: vk::TRUE,
            fill_mode_non_solid: supported.fill_mode_non_solid,
            geometry_shader: supported.geometry_shader,
            ..Default::default()
        };

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(selection.physical_device, &create_info, None) }
            .context("Failed to create logical device")?;

        let queues = chosen
            .iter()
            .map(|&(index, usage, presentable)| {
                let queue = unsafe { device.get_device_queue(index, 0) };
                log::info!("Queue family {}: {:?} (present: {})", index, usage, presentable);
                QueueFamily {
                    index,
                    queue,
                    usage,
                    presentable,
                }
            })
            .collect();

        Ok((device, QueueSet::new(queues)))
    }

    /// Resources are shared between every family we created a queue on
    fn sharing(&self) -> (vk::SharingMode, Vec<u32>) {
        let indices = self.queues.family_indices();
        if indices.len() > 1 {
            (vk::SharingMode::CONCURRENT, indices)
        } else {
            (vk::SharingMode::EXCLUSIVE, Vec::new())
        }
    }

    fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> Result<Allocation> {
        self.allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .with_context(|| format!("Failed to allocate memory for '{}'", name))
    }

    fn free(&self, allocation: Allocation) {
        if let Err(e) = self.allocator.lock().free(allocation) {
            log::error!("Failed to free allocation: {:?}", e);
        }
    }
}

fn queue_usage(flags: vk::QueueFlags) -> QueueUsage {
    let mut usage = QueueUsage::empty();
    if flags.contains(vk::QueueFlags::GRAPHICS) {
        usage |= QueueUsage::GRAPHICS;
    }
    if flags.contains(vk::QueueFlags::COMPUTE) {
        usage |= QueueUsage::COMPUTE;
    }
    // Graphics and compute queues implicitly support transfers
    if flags.intersects(vk::QueueFlags::TRANSFER | vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE) {
        usage |= QueueUsage::TRANSFER;
    }
    usage
}

impl RawDevice for VulkanDevice {
    type Allocation = Allocation;

    fn queues(&self) -> &QueueSet {
        &self.queues
    }

    fn create_render_pass(&self, info: &vk::RenderPassCreateInfo) -> Result<vk::RenderPass> {
        Ok(unsafe { self.device.create_render_pass(info, None) }?)
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) }
    }

    fn create_descriptor_set_layout(
        &self,
        info: &vk::DescriptorSetLayoutCreateInfo,
    ) -> Result<vk::DescriptorSetLayout> {
        Ok(unsafe { self.device.create_descriptor_set_layout(info, None) }?)
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) }
    }

    fn create_pipeline_layout(&self, info: &vk::PipelineLayoutCreateInfo) -> Result<vk::PipelineLayout> {
        Ok(unsafe { self.device.create_pipeline_layout(info, None) }?)
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) }
    }

    fn create_graphics_pipeline(&self, info: &vk::GraphicsPipelineCreateInfo) -> Result<vk::Pipeline> {
        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(info), None)
        }
        .map_err(|(_, e)| e)?;
        pipelines.into_iter().next().context("Driver returned no pipeline")
    }

    fn create_compute_pipeline(&self, info: &vk::ComputePipelineCreateInfo) -> Result<vk::Pipeline> {
        let pipelines = unsafe {
            self.device
                .create_compute_pipelines(vk::PipelineCache::null(), std::slice::from_ref(info), None)
        }
        .map_err(|(_, e)| e)?;
        pipelines.into_iter().next().context("Driver returned no pipeline")
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) }
    }

    fn create_shader_module(&self, code: &[u32]) -> Result<vk::ShaderModule> {
        let info = vk::ShaderModuleCreateInfo::builder().code(code);
        Ok(unsafe { self.device.create_shader_module(&info, None) }?)
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.device.destroy_shader_module(module, None) }
    }

    fn create_sampler(&self, info: &vk::SamplerCreateInfo) -> Result<vk::Sampler> {
        let mut info = *info;
        info.max_anisotropy = info.max_anisotropy.min(self.properties.limits.max_sampler_anisotropy);
        Ok(unsafe { self.device.create_sampler(&info, None) }?)
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.device.destroy_sampler(sampler, None) }
    }

    fn create_descriptor_pool(&self, info: &vk::DescriptorPoolCreateInfo) -> Result<vk::DescriptorPool> {
        Ok(unsafe { self.device.create_descriptor_pool(info, None) }?)
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) }
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> VkResult<vk::DescriptorSet> {
        let layouts = [layout];
        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        let sets = unsafe { self.device.allocate_descriptor_sets(&info) }?;
        sets.into_iter().next().ok_or(vk::Result::ERROR_UNKNOWN)
    }

    fn free_descriptor_set(&self, pool: vk::DescriptorPool, set: vk::DescriptorSet) -> Result<()> {
        Ok(unsafe { self.device.free_descriptor_sets(pool, &[set]) }?)
    }

    fn write_descriptor_set(&self, write: &vk::WriteDescriptorSet) {
        unsafe { self.device.update_descriptor_sets(std::slice::from_ref(write), &[]) }
    }

    fn create_command_pool(&self, queue_family: u32) -> Result<vk::CommandPool> {
        let info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family);
        Ok(unsafe { self.device.create_command_pool(&info, None) }?)
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) }
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> Result<vk::CommandBuffer> {
        let info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.device.allocate_command_buffers(&info) }?;
        buffers.into_iter().next().context("Driver returned no command buffer")
    }

    fn free_command_buffer(&self, pool: vk::CommandPool, cmd: vk::CommandBuffer) {
        unsafe { self.device.free_command_buffers(pool, &[cmd]) }
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        // No ONE_TIME_SUBMIT: recordings may be resubmitted
        let info = vk::CommandBufferBeginInfo::builder();
        Ok(unsafe { self.device.begin_command_buffer(cmd, &info) }?)
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        Ok(unsafe { self.device.end_command_buffer(cmd) }?)
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        Ok(unsafe {
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
        }?)
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::builder().flags(flags);
        Ok(unsafe { self.device.create_fence(&info, None) }?)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn fence_signaled(&self, fence: vk::Fence) -> Result<bool> {
        Ok(unsafe { self.device.get_fence_status(fence) }?)
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> Result<()> {
        Ok(unsafe { self.device.wait_for_fences(&[fence], true, timeout) }?)
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        Ok(unsafe { self.device.reset_fences(&[fence]) }?)
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let info = vk::SemaphoreCreateInfo::builder();
        Ok(unsafe { self.device.create_semaphore(&info, None) }?)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    fn create_buffer(
        &self,
        name: &str,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<(vk::Buffer, Allocation)> {
        let (sharing_mode, families) = self.sharing();
        let info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(sharing_mode)
            .queue_family_indices(&families);
        let buffer = unsafe { self.device.create_buffer(&info, None) }?;

        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let allocation = match self.allocate(name, requirements, location, true) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        if let Err(e) = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        } {
            self.free(allocation);
            unsafe { self.device.destroy_buffer(buffer, None) };
            return Err(e).context("Failed to bind buffer memory");
        }
        Ok((buffer, allocation))
    }

    fn destroy_buffer(&self, buffer: vk::Buffer, allocation: Allocation) {
        self.free(allocation);
        unsafe { self.device.destroy_buffer(buffer, None) }
    }

    fn write_allocation(&self, allocation: &mut Allocation, offset: u64, data: &[u8]) -> Result<()> {
        let Some(mapped) = allocation.mapped_slice_mut() else {
            bail!("Allocation is not host mapped");
        };
        let start = offset as usize;
        let Some(target) = mapped.get_mut(start..start + data.len()) else {
            bail!("Write of {} bytes at {} exceeds mapped range", data.len(), offset);
        };
        target.copy_from_slice(data);
        Ok(())
    }

    fn create_image(
        &self,
        name: &str,
        info: &vk::ImageCreateInfo,
        location: MemoryLocation,
    ) -> Result<(vk::Image, Allocation)> {
        let (sharing_mode, families) = self.sharing();
        let mut info = *info;
        info.sharing_mode = sharing_mode;
        info.queue_family_index_count = families.len() as u32;
        info.p_queue_family_indices = families.as_ptr();
        let image = unsafe { self.device.create_image(&info, None) }?;

        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let allocation = match self.allocate(name, requirements, location, false) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        if let Err(e) = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        } {
            self.free(allocation);
            unsafe { self.device.destroy_image(image, None) };
            return Err(e).context("Failed to bind image memory");
        }
        Ok((image, allocation))
    }

    fn destroy_image(&self, image: vk::Image, allocation: Allocation) {
        self.free(allocation);
        unsafe { self.device.destroy_image(image, None) }
    }

    fn create_image_view(&self, info: &vk::ImageViewCreateInfo) -> Result<vk::ImageView> {
        Ok(unsafe { self.device.create_image_view(info, None) }?)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) }
    }

    fn create_framebuffer(&self, info: &vk::FramebufferCreateInfo) -> Result<vk::Framebuffer> {
        Ok(unsafe { self.device.create_framebuffer(info, None) }?)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) }
    }

    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        unsafe { self.device.cmd_bind_pipeline(cmd, bind_point, pipeline) }
    }

    fn cmd_bind_vertex_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer) {
        unsafe { self.device.cmd_bind_vertex_buffers(cmd, 0, &[buffer], &[0]) }
    }

    fn cmd_bind_index_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer, index_type: vk::IndexType) {
        unsafe { self.device.cmd_bind_index_buffer(cmd, buffer, 0, index_type) }
    }

    fn cmd_bind_descriptor_set(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        set_index: u32,
        set: vk::DescriptorSet,
    ) {
        unsafe {
            self.device
                .cmd_bind_descriptor_sets(cmd, bind_point, layout, set_index, &[set], &[])
        }
    }

    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        unsafe { self.device.cmd_push_constants(cmd, layout, stages, offset, data) }
    }

    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewport: &vk::Viewport) {
        unsafe { self.device.cmd_set_viewport(cmd, 0, std::slice::from_ref(viewport)) }
    }

    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissor: &vk::Rect2D) {
        unsafe { self.device.cmd_set_scissor(cmd, 0, std::slice::from_ref(scissor)) }
    }

    fn cmd_begin_render_pass(&self, cmd: vk::CommandBuffer, info: &vk::RenderPassBeginInfo) {
        unsafe {
            self.device
                .cmd_begin_render_pass(cmd, info, vk::SubpassContents::INLINE)
        }
    }

    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_render_pass(cmd) }
    }

    fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32) {
        unsafe { self.device.cmd_draw(cmd, vertex_count, 1, 0, 0) }
    }

    fn cmd_draw_indexed(&self, cmd: vk::CommandBuffer, index_count: u32) {
        unsafe { self.device.cmd_draw_indexed(cmd, index_count, 1, 0, 0, 0) }
    }

    fn cmd_dispatch(&self, cmd: vk::CommandBuffer, x: u32, y: u32, z: u32) {
        unsafe { self.device.cmd_dispatch(cmd, x, y, z) }
    }

    fn cmd_copy_buffer(&self, cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, size: u64) {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        unsafe { self.device.cmd_copy_buffer(cmd, src, dst, &[region]) }
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        image: vk::Image,
        region: &vk::BufferImageCopy,
    ) {
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                cmd,
                src,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(region),
            )
        }
    }

    fn cmd_image_barrier(
        &self,
        cmd: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: &vk::ImageMemoryBarrier,
    ) {
        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(barrier),
            )
        }
    }

    fn queue_submit(&self, queue: vk::Queue, submit: &vk::SubmitInfo, fence: vk::Fence) -> Result<()> {
        Ok(unsafe { self.device.queue_submit(queue, std::slice::from_ref(submit), fence) }?)
    }

    fn create_swapchain(&self, info: &SwapchainInfo, old: vk::SwapchainKHR) -> Result<SwapchainImages> {
        let caps = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, self.surface)
        }?;
        let formats = unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(self.physical_device, self.surface)
        }?;
        let present_modes = unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(self.physical_device, self.surface)
        }?;

        let wanted_format: vk::Format = info.format.into();
        let wanted_space: vk::ColorSpaceKHR = info.color_space.into();
        let surface_format = formats
            .iter()
            .find(|f| f.format == wanted_format && f.color_space == wanted_space)
            .or_else(|| formats.first())
            .copied()
            .context("No suitable surface format")?;
        if surface_format.format != wanted_format {
            log::warn!("Surface format {:?} unavailable, using {:?}", wanted_format, surface_format.format);
        }

        // FIFO is always supported
        let wanted_mode: vk::PresentModeKHR = info.present_mode.into();
        let present_mode = if present_modes.contains(&wanted_mode) {
            wanted_mode
        } else {
            log::warn!("Present mode {:?} unavailable, falling back to FIFO", wanted_mode);
            vk::PresentModeKHR::FIFO
        };
        log::info!("Present mode: {:?}", present_mode);

        let extent = if caps.current_extent.width != u32::MAX {
            caps.current_extent
        } else {
            vk::Extent2D {
                width: info
                    .extent
                    .width
                    .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
                height: info
                    .extent
                    .height
                    .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
            }
        };

        let mut image_count = caps.min_image_count + 1;
        if caps.max_image_count > 0 && image_count > caps.max_image_count {
            image_count = caps.max_image_count;
        }

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old);

        let handle = unsafe { self.swapchain_loader.create_swapchain(&create_info, None) }?;
        let images = match unsafe { self.swapchain_loader.get_swapchain_images(handle) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { self.swapchain_loader.destroy_swapchain(handle, None) };
                return Err(e).context("Failed to get swapchain images");
            }
        };

        Ok(SwapchainImages {
            handle,
            images,
            format: surface_format.format,
            extent,
        })
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) }
    }

    fn acquire_next_image(&self, swapchain: vk::SwapchainKHR, signal: vk::Semaphore) -> VkResult<(u32, bool)> {
        unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, u64::MAX, signal, vk::Fence::null())
        }
    }

    fn queue_present(
        &self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool> {
        let wait_semaphores = [wait];
        let swapchains = [swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        unsafe { self.swapchain_loader.queue_present(queue, &present_info) }
    }

    fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        // Wait for device to finish
        if let Err(e) = self.wait_idle() {
            log::error!("Device wait failed during teardown: {:?}", e);
        }

        // Cleanup in reverse order
        unsafe {
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
