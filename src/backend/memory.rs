// Memory type selection
//
// Every buffer and image in the renderer owns a dedicated allocation, so the
// only policy needed is picking a memory type index for a requirement mask.

use ash::vk;

use super::error::{RenderError, Result};

/// Find the lowest memory type index allowed by `type_filter` whose property
/// flags contain every flag in `required`.
pub fn select_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32> {
    let count = memory_properties.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32);

    (0..count)
        .find(|&i| {
            let allowed = type_filter & (1 << i) != 0;
            allowed
                && memory_properties.memory_types[i as usize]
                    .property_flags
                    .contains(required)
        })
        .ok_or(RenderError::NoSuitableMemoryType {
            type_bits: type_filter,
            required,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    type Flags = vk::MemoryPropertyFlags;

    /// Layout resembling a discrete GPU: VRAM, host RAM, host cached, BAR.
    fn synthetic_table() -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 4,
            ..Default::default()
        };
        let types = [
            Flags::DEVICE_LOCAL,
            Flags::HOST_VISIBLE | Flags::HOST_COHERENT,
            Flags::HOST_VISIBLE | Flags::HOST_COHERENT | Flags::HOST_CACHED,
            Flags::DEVICE_LOCAL | Flags::HOST_VISIBLE | Flags::HOST_COHERENT,
        ];
        for (i, flags) in types.into_iter().enumerate() {
            props.memory_types[i] = vk::MemoryType {
                property_flags: flags,
                heap_index: 0,
            };
        }
        props
    }

    #[test]
    fn picks_lowest_matching_index() {
        let table = synthetic_table();

        assert_eq!(select_memory_type(&table, 0b1111, Flags::DEVICE_LOCAL).unwrap(), 0);
        assert_eq!(
            select_memory_type(&table, 0b1111, Flags::HOST_VISIBLE | Flags::HOST_COHERENT).unwrap(),
            1
        );
        assert_eq!(select_memory_type(&table, 0b1111, Flags::HOST_CACHED).unwrap(), 2);
        assert_eq!(
            select_memory_type(&table, 0b1111, Flags::DEVICE_LOCAL | Flags::HOST_VISIBLE).unwrap(),
            3
        );
    }

    #[test]
    fn respects_type_filter() {
        let table = synthetic_table();

        assert_eq!(select_memory_type(&table, 0b1110, Flags::DEVICE_LOCAL).unwrap(), 3);
        assert_eq!(select_memory_type(&table, 0b1100, Flags::HOST_VISIBLE).unwrap(), 2);
        assert_eq!(select_memory_type(&table, 0b1000, Flags::empty()).unwrap(), 3);
    }

    #[test]
    fn empty_requirement_matches_first_allowed() {
        let table = synthetic_table();
        assert_eq!(select_memory_type(&table, 0b0100, Flags::empty()).unwrap(), 2);
    }

    #[test]
    fn exhaustive_against_reference() {
        let table = synthetic_table();
        let candidates = [
            Flags::empty(),
            Flags::DEVICE_LOCAL,
            Flags::HOST_VISIBLE,
            Flags::HOST_COHERENT,
            Flags::HOST_CACHED,
            Flags::HOST_VISIBLE | Flags::HOST_COHERENT,
            Flags::DEVICE_LOCAL | Flags::HOST_VISIBLE,
            Flags::LAZILY_ALLOCATED,
        ];

        for filter in 0u32..16 {
            for required in candidates {
                let expected = (0..4u32).find(|&i| {
                    filter & (1 << i) != 0
                        && table.memory_types[i as usize].property_flags.contains(required)
                });
                match (select_memory_type(&table, filter, required), expected) {
                    (Ok(index), Some(want)) => assert_eq!(index, want),
                    (Err(RenderError::NoSuitableMemoryType { type_bits, .. }), None) => {
                        assert_eq!(type_bits, filter)
                    }
                    (got, want) => panic!(
                        "filter {filter:#06b} {required:?}: got {got:?}, expected {want:?}"
                    ),
                }
            }
        }
    }

    #[test]
    fn fails_when_nothing_matches() {
        let table = synthetic_table();

        assert!(matches!(
            select_memory_type(&table, 0b0001, Flags::HOST_VISIBLE),
            Err(RenderError::NoSuitableMemoryType { .. })
        ));
        assert!(matches!(
            select_memory_type(&table, 0, Flags::empty()),
            Err(RenderError::NoSuitableMemoryType { .. })
        ));
        assert!(matches!(
            select_memory_type(&table, 0b1111, Flags::PROTECTED),
            Err(RenderError::NoSuitableMemoryType { .. })
        ));
    }

    #[test]
    fn ignores_entries_past_type_count() {
        let mut table = synthetic_table();
        table.memory_types[5].property_flags = Flags::PROTECTED;
        assert!(select_memory_type(&table, u32::MAX, Flags::PROTECTED).is_err());
    }
}
