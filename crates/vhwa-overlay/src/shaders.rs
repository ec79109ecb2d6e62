//! Fragment shader sources the program manager assembles programs from.
//!
//! Every program is one fragment shader built from an ordered list of fragments: a color
//! conversion entry point `cconv()`, an optional destination keying check and a `main`. Texture
//! coordinate set 0 addresses the source; the destination follows the source's sets (1 for packed
//! formats, 2 for YV12 whose chroma planes use set 1).

use vhwa_protocol::fourcc::{FOURCC_AYUV, FOURCC_UYVY, FOURCC_YUY2, FOURCC_YV12};

use crate::program::ProgramFeatures;

const CCONV_APPLY_AYUV: &str = r#"
void cconvApplyAYUV(vec4 color)
{
    float y = 1.164 * (color.r - 0.0625);
    float u = color.g - 0.5;
    float v = color.b - 0.5;
    gl_FragColor = vec4(y + 1.596 * v, y - 0.391 * u - 0.813 * v, y + 2.018 * u, 1.0);
}
"#;

const CCONV_BGR: &str = r#"
#extension GL_ARB_texture_rectangle : enable
uniform sampler2DRect uSrcTex;
void cconv()
{
    gl_FragColor = texture2DRect(uSrcTex, vec2(gl_TexCoord[0]));
}
"#;

const CCONV_AYUV: &str = r#"
#extension GL_ARB_texture_rectangle : enable
uniform sampler2DRect uSrcTex;
void cconvApplyAYUV(vec4 color);
void cconv()
{
    vec4 texel = texture2DRect(uSrcTex, vec2(gl_TexCoord[0]));
    cconvApplyAYUV(texel);
}
"#;

// One texel holds U0 Y0 V0 Y1.
const CCONV_UYVY: &str = r#"
#extension GL_ARB_texture_rectangle : enable
uniform sampler2DRect uSrcTex;
void cconvApplyAYUV(vec4 color);
void cconv()
{
    vec2 srcCoord = vec2(gl_TexCoord[0]);
    vec4 texel = texture2DRect(uSrcTex, srcCoord);
    float y = fract(srcCoord.x) < 0.5 ? texel.g : texel.a;
    cconvApplyAYUV(vec4(y, texel.b, texel.r, 1.0));
}
"#;

// One texel holds Y0 U0 Y1 V0.
const CCONV_YUY2: &str = r#"
#extension GL_ARB_texture_rectangle : enable
uniform sampler2DRect uSrcTex;
void cconvApplyAYUV(vec4 color);
void cconv()
{
    vec2 srcCoord = vec2(gl_TexCoord[0]);
    vec4 texel = texture2DRect(uSrcTex, srcCoord);
    float y = fract(srcCoord.x) < 0.5 ? texel.b : texel.r;
    cconvApplyAYUV(vec4(y, texel.g, texel.a, 1.0));
}
"#;

// Each plane packs four samples per texel.
const CCONV_YV12: &str = r#"
#extension GL_ARB_texture_rectangle : enable
uniform sampler2DRect uSrcTex;
uniform sampler2DRect uVTex;
uniform sampler2DRect uUTex;
void cconvApplyAYUV(vec4 color);
float pick(vec4 texel, float part)
{
    if (part < 0.25) return texel.b;
    if (part < 0.5) return texel.g;
    if (part < 0.75) return texel.r;
    return texel.a;
}
void cconv()
{
    vec2 yCoord = vec2(gl_TexCoord[0]);
    vec2 cCoord = vec2(gl_TexCoord[1]);
    float y = pick(texture2DRect(uSrcTex, yCoord), fract(yCoord.x));
    float v = pick(texture2DRect(uVTex, cCoord), fract(cCoord.x));
    float u = pick(texture2DRect(uUTex, cCoord), fract(cCoord.x));
    cconvApplyAYUV(vec4(y, u, v, 1.0));
}
"#;

const CKEY_DST: &str = r#"
#extension GL_ARB_texture_rectangle : enable
uniform sampler2DRect uDstTex;
uniform vec4 uDstClr;
void ckeyDst()
{
    vec4 dstColor = texture2DRect(uDstTex, vec2(gl_TexCoord[1]));
    vec3 difColor = dstColor.rgb - uDstClr.rgb;
    if (any(greaterThan(abs(difColor), vec3(0.001))))
        discard;
}
"#;

const CKEY_DST2: &str = r#"
#extension GL_ARB_texture_rectangle : enable
uniform sampler2DRect uDstTex;
uniform vec4 uDstClr;
void ckeyDst()
{
    vec4 dstColor = texture2DRect(uDstTex, vec2(gl_TexCoord[2]));
    vec3 difColor = dstColor.rgb - uDstClr.rgb;
    if (any(greaterThan(abs(difColor), vec3(0.001))))
        discard;
}
"#;

const MAIN_OVERLAY: &str = r#"
void cconv();
void ckeyDst();
void main()
{
    ckeyDst();
    cconv();
}
"#;

const MAIN_OVERLAY_NO_CKEY: &str = r#"
void cconv();
void main()
{
    cconv();
}
"#;

const MAIN_OVERLAY_NO_DISCARD: &str = r#"
#extension GL_ARB_texture_rectangle : enable
uniform sampler2DRect uDstTex;
uniform vec4 uDstClr;
void cconv();
void main()
{
    vec4 dstColor = texture2DRect(uDstTex, vec2(gl_TexCoord[1]));
    vec3 difColor = dstColor.rgb - uDstClr.rgb;
    if (any(greaterThan(abs(difColor), vec3(0.001))))
        gl_FragColor = dstColor;
    else
        cconv();
}
"#;

const MAIN_OVERLAY_NO_DISCARD2: &str = r#"
#extension GL_ARB_texture_rectangle : enable
uniform sampler2DRect uDstTex;
uniform vec4 uDstClr;
void cconv();
void main()
{
    vec4 dstColor = texture2DRect(uDstTex, vec2(gl_TexCoord[2]));
    vec3 difColor = dstColor.rgb - uDstClr.rgb;
    if (any(greaterThan(abs(difColor), vec3(0.001))))
        gl_FragColor = dstColor;
    else
        cconv();
}
"#;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fragment {
    CConvApplyAyuv,
    CConvBgr,
    CConvAyuv,
    CConvUyvy,
    CConvYuy2,
    CConvYv12,
    CKeyDst,
    CKeyDst2,
    MainOverlay,
    MainOverlayNoCKey,
    MainOverlayNoDiscard,
    MainOverlayNoDiscard2,
}

impl Fragment {
    pub fn source(self) -> &'static str {
        match self {
            Fragment::CConvApplyAyuv => CCONV_APPLY_AYUV,
            Fragment::CConvBgr => CCONV_BGR,
            Fragment::CConvAyuv => CCONV_AYUV,
            Fragment::CConvUyvy => CCONV_UYVY,
            Fragment::CConvYuy2 => CCONV_YUY2,
            Fragment::CConvYv12 => CCONV_YV12,
            Fragment::CKeyDst => CKEY_DST,
            Fragment::CKeyDst2 => CKEY_DST2,
            Fragment::MainOverlay => MAIN_OVERLAY,
            Fragment::MainOverlayNoCKey => MAIN_OVERLAY_NO_CKEY,
            Fragment::MainOverlayNoDiscard => MAIN_OVERLAY_NO_DISCARD,
            Fragment::MainOverlayNoDiscard2 => MAIN_OVERLAY_NO_DISCARD2,
        }
    }
}

fn cconv_for(fourcc: u32) -> Option<Fragment> {
    match fourcc {
        FOURCC_UYVY => Some(Fragment::CConvUyvy),
        FOURCC_YUY2 => Some(Fragment::CConvYuy2),
        FOURCC_YV12 => Some(Fragment::CConvYv12),
        FOURCC_AYUV => Some(Fragment::CConvAyuv),
        _ => None,
    }
}

/// Ordered fragments for a program, plus the feature set the program actually implements.
///
/// The conversion helper goes first: some drivers require a function to be defined before the
/// fragment that calls it. Source keying is never compiled in and is dropped from the result.
pub fn assemble(features: ProgramFeatures, fourcc: u32) -> (Vec<Fragment>, ProgramFeatures) {
    let mut features = features - ProgramFeatures::SRC_COLORKEY;
    let yv12 = fourcc == FOURCC_YV12;
    let dst_key = features.contains(ProgramFeatures::DST_COLORKEY);
    let no_discard = features.contains(ProgramFeatures::COLORKEY_NODISCARD);

    let cconv = cconv_for(fourcc);
    let mut fragments = vec![match cconv {
        Some(_) => Fragment::CConvApplyAyuv,
        None => Fragment::CConvBgr,
    }];
    features.set(ProgramFeatures::COLORCONV, cconv.is_some());

    if dst_key && !no_discard {
        fragments.push(if yv12 {
            Fragment::CKeyDst2
        } else {
            Fragment::CKeyDst
        });
    }
    fragments.extend(cconv);

    fragments.push(match (dst_key, no_discard, yv12) {
        (true, true, true) => Fragment::MainOverlayNoDiscard2,
        (true, true, false) => Fragment::MainOverlayNoDiscard,
        (true, false, _) => Fragment::MainOverlay,
        (false, _, _) => Fragment::MainOverlayNoCKey,
    });
    (fragments, features)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn rgb_without_keys_is_a_pass_through() {
        let (frags, features) = assemble(ProgramFeatures::empty(), 0);
        assert_eq!(frags, [Fragment::CConvBgr, Fragment::MainOverlayNoCKey]);
        assert_eq!(features, ProgramFeatures::empty());
    }

    #[test]
    fn yv12_dst_key_uses_the_third_coordinate_set() {
        let (frags, features) = assemble(ProgramFeatures::DST_COLORKEY, FOURCC_YV12);
        assert_eq!(
            frags,
            [
                Fragment::CConvApplyAyuv,
                Fragment::CKeyDst2,
                Fragment::CConvYv12,
                Fragment::MainOverlay,
            ]
        );
        assert_eq!(
            features,
            ProgramFeatures::DST_COLORKEY | ProgramFeatures::COLORCONV
        );
    }

    #[test]
    fn no_discard_main_carries_its_own_key_check() {
        let (frags, _) = assemble(
            ProgramFeatures::DST_COLORKEY
                | ProgramFeatures::COLORKEY_NODISCARD
                | ProgramFeatures::SRC_COLORKEY,
            FOURCC_UYVY,
        );
        assert_eq!(
            frags,
            [
                Fragment::CConvApplyAyuv,
                Fragment::CConvUyvy,
                Fragment::MainOverlayNoDiscard,
            ]
        );
        assert!(Fragment::MainOverlayNoDiscard.source().contains("uDstClr"));
    }
}
