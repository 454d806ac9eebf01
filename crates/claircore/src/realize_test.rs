use std::collections::HashMap;
use std::io::Write;

use super::*;
use crate::manifest::LayerRef;

fn gzip_tar(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut tar_bytes = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut tar_bytes);
        for (path, contents) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, *contents).unwrap();
        }
        builder.finish().unwrap();
    }
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(&tar_bytes).unwrap();
    encoder.finish().unwrap()
}

#[tokio::test]
async fn static_realizer_populates_registered_layers() {
    let mut files = HashMap::new();
    files.insert("etc/os-release".to_string(), b"ID=alpine".to_vec());
    let hash = Digest::sha256(b"layer");
    let realizer = StaticRealizer::new().with_layer(hash.clone(), files);
    let layer = Layer::new(LayerRef::new(hash, "oci://layer"));
    realizer.realize(CancellationToken::new(), &[layer.clone()]).await.unwrap();
    assert!(layer.is_realized());
    assert_eq!(layer.fs().unwrap().read_file("etc/os-release").unwrap(), b"ID=alpine");
}

#[tokio::test]
async fn static_realizer_fails_for_an_unregistered_layer() {
    let realizer = StaticRealizer::new();
    let layer = Layer::new(LayerRef::new(Digest::sha256(b"missing"), "oci://layer"));
    let err = realizer.realize(CancellationToken::new(), &[layer]).await.unwrap_err();
    assert!(matches!(err, Error::Realize { .. }));
}

#[tokio::test]
async fn realize_is_a_no_op_for_an_already_realized_layer() {
    let realizer = StaticRealizer::new();
    let layer = Layer::new(LayerRef::new(Digest::sha256(b"l"), "oci://layer"));
    layer.realize_with(Arc::new(MemoryLayerFs::new(HashMap::new())));
    realizer.realize(CancellationToken::new(), &[layer.clone()]).await.unwrap();
    assert!(layer.is_realized());
}

#[test]
fn unpack_tar_skips_directories_and_strips_leading_dot_slash() {
    let archive = {
        let mut tar_bytes = Vec::new();
        let mut builder = tar::Builder::new(&mut tar_bytes);
        let mut dir_header = tar::Header::new_gnu();
        dir_header.set_entry_type(tar::EntryType::Directory);
        dir_header.set_size(0);
        dir_header.set_mode(0o755);
        dir_header.set_cksum();
        builder.append_data(&mut dir_header, "./etc/", &[][..]).unwrap();

        let mut file_header = tar::Header::new_gnu();
        file_header.set_size(4);
        file_header.set_mode(0o644);
        file_header.set_cksum();
        builder.append_data(&mut file_header, "./etc/hostname", &b"host"[..]).unwrap();
        builder.finish().unwrap();
        tar_bytes
    };
    let digest = Digest::sha256(b"x");
    let files = unpack_tar(&archive, &digest).unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files.get("etc/hostname").unwrap(), b"host");
}

#[test]
fn decompress_passes_through_plain_tar_untouched() {
    let tar_bytes = gzip_tar(&[("a", b"A")]);
    let digest = Digest::sha256(b"x");
    let decompressed = decompress(&tar_bytes, &digest).unwrap();
    let files = unpack_tar(&decompressed, &digest).unwrap();
    assert_eq!(files.get("a").unwrap(), b"A");
}
