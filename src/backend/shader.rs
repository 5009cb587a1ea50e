// Shader module loading
//
// Shaders are SPIR-V files compiled by build.rs and read at pipeline
// creation time, so a rebuild picks up whatever is on disk.

use ash::vk;
use std::fs::File;
use std::path::Path;

use super::error::{RenderError, Result};
use super::VulkanDevice;

/// Read a SPIR-V file and create a shader module from it
pub fn load_shader_module(device: &VulkanDevice, path: &Path) -> Result<vk::ShaderModule> {
    let shader_error = |reason: String| RenderError::ShaderLoad {
        path: path.to_path_buf(),
        reason,
    };

    let mut file = File::open(path).map_err(|e| shader_error(e.to_string()))?;
    // read_spv handles alignment and endianness of the word stream
    let code = ash::util::read_spv(&mut file).map_err(|e| shader_error(e.to_string()))?;

    let create_info = vk::ShaderModuleCreateInfo::default().code(&code);

    log::debug!("Loaded shader {:?} ({} words)", path, code.len());
    unsafe { device.device.create_shader_module(&create_info, None) }
        .map_err(RenderError::creation("shader module"))
}
