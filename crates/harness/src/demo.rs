//! A built-in guest that paints a gradient and publishes it through the
//! host-mapped heap-start field.

use rvfleet_common::{MachineConfig, PixelFormat, RegionSpec};
use rvfleet_isa::{InstructionTag as T, asm, reg};
use rvfleet_kernel::syscall;
use rvfleet_loader::ImageBuilder;

/// A compact machine sized for `width * height` RGB8 pixels.
pub fn test_config(instance_count: usize, width: u32, height: u32) -> MachineConfig {
    let mut config = MachineConfig::default();
    let pixels = (width * height * 3).next_multiple_of(4096).max(4096);
    config.memory.flash = RegionSpec::new(config.memory.flash.base, 64 * 1024);
    config.memory.ram = RegionSpec::new(config.memory.ram.base, 64 * 1024);
    config.memory.heap = RegionSpec::new(config.memory.heap.base, pixels);
    config.host_mapped.scratch_size = 4096;
    config.harness.instance_count = instance_count;
    config.harness.max_steps = 10_000_000;
    config.framebuffer.width = width;
    config.framebuffer.height = height;
    config.framebuffer.channels = 3;
    config.framebuffer.format = PixelFormat::Rgb8;
    config
}

/// Gradient guest for `config`.
///
/// Publishes the heap base as the framebuffer, fills `width * height` RGB8
/// pixels (red along x, green along y, blue the complement of red), prints
/// a line, and exits 0.
pub fn gradient_program(config: &MachineConfig) -> Vec<u32> {
    let hm = config.host_mapped;
    let fb = &config.framebuffer;
    let mut code = Vec::new();

    code.extend(asm::li(reg::T3, hm.base + hm.start_heap_offset));
    code.extend(asm::li(reg::T1, config.memory.heap.base));
    code.push(asm::store(T::Sw, reg::T1, reg::T3, 0));
    code.extend(asm::li(reg::T3, hm.base + hm.control_offset));
    code.push(asm::addi(reg::T2, reg::ZERO, 1));
    code.push(asm::store(T::Sw, reg::T2, reg::T3, 0));

    code.push(asm::addi(reg::A0, reg::T1, 0));
    code.push(asm::addi(reg::S0, reg::ZERO, 0));
    code.extend(asm::li(reg::T4, fb.width));
    code.extend(asm::li(reg::T5, fb.height));
    code.push(asm::addi(reg::T6, reg::ZERO, 255));

    let row = code.len();
    code.push(asm::addi(reg::S1, reg::ZERO, 0));
    let column = code.len();
    code.push(asm::rtype(T::Mul, reg::A1, reg::S1, reg::T6));
    code.push(asm::rtype(T::Divu, reg::A1, reg::A1, reg::T4));
    code.push(asm::store(T::Sb, reg::A1, reg::A0, 0));
    code.push(asm::rtype(T::Mul, reg::A2, reg::S0, reg::T6));
    code.push(asm::rtype(T::Divu, reg::A2, reg::A2, reg::T5));
    code.push(asm::store(T::Sb, reg::A2, reg::A0, 1));
    code.push(asm::rtype(T::Sub, reg::A3, reg::T6, reg::A1));
    code.push(asm::store(T::Sb, reg::A3, reg::A0, 2));
    code.push(asm::addi(reg::A0, reg::A0, 3));
    code.push(asm::addi(reg::S1, reg::S1, 1));
    let offset = (column as i32 - code.len() as i32) * 4;
    code.push(asm::branch(T::Bne, reg::S1, reg::T4, offset));
    code.push(asm::addi(reg::S0, reg::S0, 1));
    let offset = (row as i32 - code.len() as i32) * 4;
    code.push(asm::branch(T::Bne, reg::S0, reg::T5, offset));

    // write(1, "ok\n", 3) from the start of ram.
    code.extend(asm::li(reg::A1, config.memory.ram.base));
    code.extend(asm::li(reg::T0, u32::from_le_bytes(*b"ok\n\0")));
    code.push(asm::store(T::Sw, reg::T0, reg::A1, 0));
    code.push(asm::addi(reg::A0, reg::ZERO, 1));
    code.push(asm::addi(reg::A2, reg::ZERO, 3));
    code.push(asm::addi(reg::A7, reg::ZERO, syscall::WRITE as i32));
    code.push(asm::ecall());

    code.push(asm::addi(reg::A0, reg::ZERO, 0));
    code.push(asm::addi(reg::A7, reg::ZERO, syscall::EXIT as i32));
    code.push(asm::ecall());
    code
}

/// The expected framebuffer of [`gradient_program`].
pub fn gradient_pixels(width: u32, height: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height {
        for x in 0..width {
            let r = (x * 255 / width) as u8;
            let g = (y * 255 / height) as u8;
            pixels.extend_from_slice(&[r, g, 255 - r]);
        }
    }
    pixels
}

/// ELF image of [`gradient_program`] placed at the flash base.
pub fn gradient_image(config: &MachineConfig) -> ImageBuilder {
    let flash = u64::from(config.memory.flash.base);
    ImageBuilder::new(flash).code(flash, &gradient_program(config))
}
