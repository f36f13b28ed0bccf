//! WGSL helper functions prepended to user shaders on demand.

/// Projects a vertex with the camera and the mesh matrices.
pub static GET_OUTPUT_POSITION: &str = include_str!("chunks/get_output_position.wgsl");
/// Passes a clip-space vertex through, for full-screen passes.
pub static GET_OUTPUT_POSITION_UNPROJECTED: &str =
    include_str!("chunks/get_output_position_unprojected.wgsl");
/// Applies a texture matrix to UV coordinates.
pub static GET_UV_COVER: &str = include_str!("chunks/get_uv_cover.wgsl");
/// Maps a 2D clip-space vertex to UV coordinates.
pub static GET_VERTEX_2D_TO_UV_COORDS: &str = include_str!("chunks/get_vertex_2d_to_uv_coords.wgsl");
/// Maps a 3D clip-space vertex to UV coordinates.
pub static GET_VERTEX_3D_TO_UV_COORDS: &str = include_str!("chunks/get_vertex_3d_to_uv_coords.wgsl");

/// A helper function and the name it is called by.
#[derive(Copy, Clone, Debug)]
pub struct ShaderChunk {
    pub name: &'static str,
    pub code: &'static str,
}

fn chunks(projected: bool) -> [ShaderChunk; 4] {
    [
        ShaderChunk {
            name: "getOutputPosition",
            code: if projected {
                GET_OUTPUT_POSITION
            } else {
                GET_OUTPUT_POSITION_UNPROJECTED
            },
        },
        ShaderChunk {
            name: "getUVCover",
            code: GET_UV_COVER,
        },
        ShaderChunk {
            name: "getVertex2DToUVCoords",
            code: GET_VERTEX_2D_TO_UV_COORDS,
        },
        ShaderChunk {
            name: "getVertex3DToUVCoords",
            code: GET_VERTEX_3D_TO_UV_COORDS,
        },
    ]
}

/// Helpers called by `code` that it does not declare itself.
///
/// `projected` selects the camera based `getOutputPosition`, which requires
/// the `camera` and `matrices` bindings.
pub fn chunks_for(code: &str, projected: bool) -> Vec<&'static str> {
    chunks(projected)
        .iter()
        .filter(|chunk| {
            code.contains(&format!("{}(", chunk.name))
                && !code.contains(&format!("fn {}(", chunk.name))
        })
        .map(|chunk| chunk.code)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_called_helpers_are_added() {
        let code = "@vertex fn main(@location(0) p: vec3f) -> @builtin(position) vec4f {\n\
                    return getOutputPosition(p);\n}";

        let added = chunks_for(code, true);
        assert_eq!(added, vec![GET_OUTPUT_POSITION]);
        assert_eq!(chunks_for(code, false), vec![GET_OUTPUT_POSITION_UNPROJECTED]);
    }

    #[test]
    fn declared_helpers_are_not_duplicated() {
        let code = "fn getUVCover(uv: vec2f, m: mat4x4f) -> vec2f { return uv; }\n\
                    fn f() -> vec2f { return getUVCover(vec2f(0.0), mat4x4f()); }";

        assert!(chunks_for(code, true).is_empty());
    }
}
