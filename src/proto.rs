//! Compiled-in FUSE protocol tables.
//!
//! The schema and layout map normally come from external inputs (a parsed
//! kernel header and a message-definition file); this module carries a
//! default set linked into the binary, built through the same public
//! builder API, so the tool works on a plain capture with no side files.
//! Struct shapes follow the kernel's `fuse.h`; the layout map follows the
//! per-opcode body conventions of the protocol.

use crate::schema::{Direction, MessageLayouts, Schema, SchemaError};

/// Protocol revision the built-in tables were written against.
pub const FUSE_MAJOR: u32 = 7;
pub const FUSE_MINOR: u32 = 31;

/// Build the default schema and layout map.
pub fn tables() -> Result<(Schema, MessageLayouts), SchemaError> {
    let schema = schema()?;
    let layouts = layouts();
    layouts.validate(&schema)?;
    Ok((schema, layouts))
}

fn schema() -> Result<Schema, SchemaError> {
    Schema::builder()
        .struct_def(
            "fuse_in_header",
            &[
                ("__u32", "len"),
                ("__u32", "opcode"),
                ("__u64", "unique"),
                ("__u64", "nodeid"),
                ("__u32", "uid"),
                ("__u32", "gid"),
                ("__u32", "pid"),
                ("__u32", "padding"),
            ],
        )
        .struct_def(
            "fuse_out_header",
            &[("__u32", "len"), ("__s32", "error"), ("__u64", "unique")],
        )
        .struct_def(
            "fuse_attr",
            &[
                ("__u64", "ino"),
                ("__u64", "size"),
                ("__u64", "blocks"),
                ("__u64", "atime"),
                ("__u64", "mtime"),
                ("__u64", "ctime"),
                ("__u32", "atimensec"),
                ("__u32", "mtimensec"),
                ("__u32", "ctimensec"),
                ("__u32", "mode"),
                ("__u32", "nlink"),
                ("__u32", "uid"),
                ("__u32", "gid"),
                ("__u32", "rdev"),
                ("__u32", "blksize"),
                ("__u32", "padding"),
            ],
        )
        .struct_def(
            "fuse_kstatfs",
            &[
                ("__u64", "blocks"),
                ("__u64", "bfree"),
                ("__u64", "bavail"),
                ("__u64", "files"),
                ("__u64", "ffree"),
                ("__u32", "bsize"),
                ("__u32", "namelen"),
                ("__u32", "frsize"),
                ("__u32", "padding"),
                ("char[24]", "spare"),
            ],
        )
        .struct_def(
            "fuse_file_lock",
            &[
                ("__u64", "start"),
                ("__u64", "end"),
                ("__u32", "type"),
                ("__u32", "pid"),
            ],
        )
        .struct_def(
            "fuse_entry_out",
            &[
                ("__u64", "nodeid"),
                ("__u64", "generation"),
                ("__u64", "entry_valid"),
                ("__u64", "attr_valid"),
                ("__u32", "entry_valid_nsec"),
                ("__u32", "attr_valid_nsec"),
                ("fuse_attr", "attr"),
            ],
        )
        .struct_def("fuse_forget_in", &[("__u64", "nlookup")])
        .struct_def(
            "fuse_forget_one",
            &[("__u64", "nodeid"), ("__u64", "nlookup")],
        )
        .struct_def(
            "fuse_batch_forget_in",
            &[("__u32", "count"), ("__u32", "dummy")],
        )
        .struct_def(
            "fuse_getattr_in",
            &[
                ("__u32", "getattr_flags"),
                ("__u32", "dummy"),
                ("__u64", "fh"),
            ],
        )
        .struct_def(
            "fuse_attr_out",
            &[
                ("__u64", "attr_valid"),
                ("__u32", "attr_valid_nsec"),
                ("__u32", "dummy"),
                ("fuse_attr", "attr"),
            ],
        )
        .struct_def(
            "fuse_mknod_in",
            &[
                ("__u32", "mode"),
                ("__u32", "rdev"),
                ("__u32", "umask"),
                ("__u32", "padding"),
            ],
        )
        .struct_def("fuse_mkdir_in", &[("__u32", "mode"), ("__u32", "umask")])
        .struct_def("fuse_rename_in", &[("__u64", "newdir")])
        .struct_def(
            "fuse_rename2_in",
            &[("__u64", "newdir"), ("__u32", "flags"), ("__u32", "padding")],
        )
        .struct_def("fuse_link_in", &[("__u64", "oldnodeid")])
        .struct_def(
            "fuse_setattr_in",
            &[
                ("__u32", "valid"),
                ("__u32", "padding"),
                ("__u64", "fh"),
                ("__u64", "size"),
                ("__u64", "lock_owner"),
                ("__u64", "atime"),
                ("__u64", "mtime"),
                ("__u64", "ctime"),
                ("__u32", "atimensec"),
                ("__u32", "mtimensec"),
                ("__u32", "ctimensec"),
                ("__u32", "mode"),
                ("__u32", "unused4"),
                ("__u32", "uid"),
                ("__u32", "gid"),
                ("__u32", "unused5"),
            ],
        )
        .struct_def("fuse_open_in", &[("__u32", "flags"), ("__u32", "unused")])
        .struct_def(
            "fuse_create_in",
            &[
                ("__u32", "flags"),
                ("__u32", "mode"),
                ("__u32", "umask"),
                ("__u32", "padding"),
            ],
        )
        .struct_def(
            "fuse_open_out",
            &[("__u64", "fh"), ("__u32", "open_flags"), ("__u32", "padding")],
        )
        .struct_def(
            "fuse_release_in",
            &[
                ("__u64", "fh"),
                ("__u32", "flags"),
                ("__u32", "release_flags"),
                ("__u64", "lock_owner"),
            ],
        )
        .struct_def(
            "fuse_flush_in",
            &[
                ("__u64", "fh"),
                ("__u32", "unused"),
                ("__u32", "padding"),
                ("__u64", "lock_owner"),
            ],
        )
        .struct_def(
            "fuse_read_in",
            &[
                ("__u64", "fh"),
                ("__u64", "offset"),
                ("__u32", "size"),
                ("__u32", "read_flags"),
                ("__u64", "lock_owner"),
                ("__u32", "flags"),
                ("__u32", "padding"),
            ],
        )
        .struct_def(
            "fuse_write_in",
            &[
                ("__u64", "fh"),
                ("__u64", "offset"),
                ("__u32", "size"),
                ("__u32", "write_flags"),
                ("__u64", "lock_owner"),
                ("__u32", "flags"),
                ("__u32", "padding"),
            ],
        )
        .struct_def("fuse_write_out", &[("__u32", "size"), ("__u32", "padding")])
        .struct_def("fuse_statfs_out", &[("fuse_kstatfs", "st")])
        .struct_def(
            "fuse_fsync_in",
            &[("__u64", "fh"), ("__u32", "fsync_flags"), ("__u32", "padding")],
        )
        .struct_def(
            "fuse_setxattr_in",
            &[("__u32", "size"), ("__u32", "flags")],
        )
        .struct_def(
            "fuse_getxattr_in",
            &[("__u32", "size"), ("__u32", "padding")],
        )
        .struct_def(
            "fuse_getxattr_out",
            &[("__u32", "size"), ("__u32", "padding")],
        )
        .struct_def(
            "fuse_lk_in",
            &[
                ("__u64", "fh"),
                ("__u64", "owner"),
                ("fuse_file_lock", "lk"),
                ("__u32", "lk_flags"),
                ("__u32", "padding"),
            ],
        )
        .struct_def("fuse_lk_out", &[("fuse_file_lock", "lk")])
        .struct_def(
            "fuse_access_in",
            &[("__u32", "mask"), ("__u32", "padding")],
        )
        .struct_def(
            "fuse_init_in",
            &[
                ("__u32", "major"),
                ("__u32", "minor"),
                ("__u32", "max_readahead"),
                ("__u32", "flags"),
            ],
        )
        .struct_def(
            "fuse_init_out",
            &[
                ("__u32", "major"),
                ("__u32", "minor"),
                ("__u32", "max_readahead"),
                ("__u32", "flags"),
                ("__u16", "max_background"),
                ("__u16", "congestion_threshold"),
                ("__u32", "max_write"),
                ("__u32", "time_gran"),
                ("char[36]", "unused"),
            ],
        )
        .struct_def("fuse_interrupt_in", &[("__u64", "unique")])
        .struct_def(
            "fuse_bmap_in",
            &[("__u64", "block"), ("__u32", "blocksize"), ("__u32", "padding")],
        )
        .struct_def("fuse_bmap_out", &[("__u64", "block")])
        .struct_def(
            "fuse_dirent",
            &[
                ("__u64", "ino"),
                ("__u64", "off"),
                ("__u32", "namelen"),
                ("__u32", "type"),
            ],
        )
        .struct_def(
            "fuse_fallocate_in",
            &[
                ("__u64", "fh"),
                ("__u64", "offset"),
                ("__u64", "length"),
                ("__u32", "mode"),
                ("__u32", "padding"),
            ],
        )
        .struct_def(
            "fuse_lseek_in",
            &[
                ("__u64", "fh"),
                ("__u64", "offset"),
                ("__u32", "whence"),
                ("__u32", "padding"),
            ],
        )
        .struct_def("fuse_lseek_out", &[("__u64", "offset")])
        .struct_def(
            "fuse_copy_file_range_in",
            &[
                ("__u64", "fh_in"),
                ("__u64", "off_in"),
                ("__u64", "nodeid_out"),
                ("__u64", "fh_out"),
                ("__u64", "off_out"),
                ("__u64", "len"),
                ("__u64", "flags"),
            ],
        )
        .enum_def(
            "fuse_opcode",
            &[
                ("FUSE_LOOKUP", 1),
                ("FUSE_FORGET", 2),
                ("FUSE_GETATTR", 3),
                ("FUSE_SETATTR", 4),
                ("FUSE_READLINK", 5),
                ("FUSE_SYMLINK", 6),
                ("FUSE_MKNOD", 8),
                ("FUSE_MKDIR", 9),
                ("FUSE_UNLINK", 10),
                ("FUSE_RMDIR", 11),
                ("FUSE_RENAME", 12),
                ("FUSE_LINK", 13),
                ("FUSE_OPEN", 14),
                ("FUSE_READ", 15),
                ("FUSE_WRITE", 16),
                ("FUSE_STATFS", 17),
                ("FUSE_RELEASE", 18),
                ("FUSE_FSYNC", 20),
                ("FUSE_SETXATTR", 21),
                ("FUSE_GETXATTR", 22),
                ("FUSE_LISTXATTR", 23),
                ("FUSE_REMOVEXATTR", 24),
                ("FUSE_FLUSH", 25),
                ("FUSE_INIT", 26),
                ("FUSE_OPENDIR", 27),
                ("FUSE_READDIR", 28),
                ("FUSE_RELEASEDIR", 29),
                ("FUSE_FSYNCDIR", 30),
                ("FUSE_GETLK", 31),
                ("FUSE_SETLK", 32),
                ("FUSE_SETLKW", 33),
                ("FUSE_ACCESS", 34),
                ("FUSE_CREATE", 35),
                ("FUSE_INTERRUPT", 36),
                ("FUSE_BMAP", 37),
                ("FUSE_DESTROY", 38),
                ("FUSE_IOCTL", 39),
                ("FUSE_POLL", 40),
                ("FUSE_NOTIFY_REPLY", 41),
                ("FUSE_BATCH_FORGET", 42),
                ("FUSE_FALLOCATE", 43),
                ("FUSE_READDIRPLUS", 44),
                ("FUSE_RENAME2", 45),
                ("FUSE_LSEEK", 46),
                ("FUSE_COPY_FILE_RANGE", 47),
            ],
        )
        .build("fuse_opcode")
}

fn layouts() -> MessageLayouts {
    use Direction::{Request as R, Response as W};

    let mut m = MessageLayouts::new();

    m.insert(R, "FUSE_LOOKUP", &["string"]);
    m.insert(W, "FUSE_LOOKUP", &["fuse_entry_out"]);

    m.insert(R, "FUSE_FORGET", &["fuse_forget_in"]);
    // FUSE_BATCH_FORGET is handled by its count-driven decoder
    m.insert_opaque(R, "FUSE_BATCH_FORGET");

    m.insert(R, "FUSE_GETATTR", &["fuse_getattr_in"]);
    m.insert(W, "FUSE_GETATTR", &["fuse_attr_out"]);

    m.insert(R, "FUSE_SETATTR", &["fuse_setattr_in"]);
    m.insert(W, "FUSE_SETATTR", &["fuse_attr_out"]);

    m.insert(R, "FUSE_READLINK", &[]);
    m.insert(W, "FUSE_READLINK", &["buf"]);

    m.insert(R, "FUSE_SYMLINK", &["string", "string"]);
    m.insert(W, "FUSE_SYMLINK", &["fuse_entry_out"]);

    m.insert(R, "FUSE_MKNOD", &["fuse_mknod_in", "string"]);
    m.insert(W, "FUSE_MKNOD", &["fuse_entry_out"]);

    m.insert(R, "FUSE_MKDIR", &["fuse_mkdir_in", "string"]);
    m.insert(W, "FUSE_MKDIR", &["fuse_entry_out"]);

    m.insert(R, "FUSE_UNLINK", &["string"]);
    m.insert(W, "FUSE_UNLINK", &[]);

    m.insert(R, "FUSE_RMDIR", &["string"]);
    m.insert(W, "FUSE_RMDIR", &[]);

    m.insert(R, "FUSE_RENAME", &["fuse_rename_in", "string", "string"]);
    m.insert(W, "FUSE_RENAME", &[]);

    m.insert(R, "FUSE_RENAME2", &["fuse_rename2_in", "string", "string"]);
    m.insert(W, "FUSE_RENAME2", &[]);

    m.insert(R, "FUSE_LINK", &["fuse_link_in", "string"]);
    m.insert(W, "FUSE_LINK", &["fuse_entry_out"]);

    m.insert(R, "FUSE_OPEN", &["fuse_open_in"]);
    m.insert(W, "FUSE_OPEN", &["fuse_open_out"]);

    m.insert(R, "FUSE_OPENDIR", &["fuse_open_in"]);
    m.insert(W, "FUSE_OPENDIR", &["fuse_open_out"]);

    m.insert(R, "FUSE_READ", &["fuse_read_in"]);
    m.insert(W, "FUSE_READ", &["buf"]);

    m.insert(R, "FUSE_WRITE", &["fuse_write_in", "buf"]);
    m.insert(W, "FUSE_WRITE", &["fuse_write_out"]);

    m.insert(R, "FUSE_STATFS", &[]);
    m.insert(W, "FUSE_STATFS", &["fuse_statfs_out"]);

    m.insert(R, "FUSE_RELEASE", &["fuse_release_in"]);
    m.insert(W, "FUSE_RELEASE", &[]);

    m.insert(R, "FUSE_RELEASEDIR", &["fuse_release_in"]);
    m.insert(W, "FUSE_RELEASEDIR", &[]);

    m.insert(R, "FUSE_FSYNC", &["fuse_fsync_in"]);
    m.insert(W, "FUSE_FSYNC", &[]);

    m.insert(R, "FUSE_FSYNCDIR", &["fuse_fsync_in"]);
    m.insert(W, "FUSE_FSYNCDIR", &[]);

    m.insert(R, "FUSE_SETXATTR", &["fuse_setxattr_in", "string", "buf"]);
    m.insert(W, "FUSE_SETXATTR", &[]);

    m.insert(R, "FUSE_GETXATTR", &["fuse_getxattr_in", "string"]);
    // response shape depends on the request's size field
    m.insert_opaque(W, "FUSE_GETXATTR");

    m.insert(R, "FUSE_LISTXATTR", &["fuse_getxattr_in"]);
    m.insert_opaque(W, "FUSE_LISTXATTR");

    m.insert(R, "FUSE_REMOVEXATTR", &["string"]);
    m.insert(W, "FUSE_REMOVEXATTR", &[]);

    m.insert(R, "FUSE_FLUSH", &["fuse_flush_in"]);
    m.insert(W, "FUSE_FLUSH", &[]);

    m.insert(R, "FUSE_INIT", &["fuse_init_in"]);
    m.insert(W, "FUSE_INIT", &["fuse_init_out"]);

    m.insert(R, "FUSE_READDIR", &["fuse_read_in"]);
    m.insert_opaque(W, "FUSE_READDIR");

    m.insert(R, "FUSE_READDIRPLUS", &["fuse_read_in"]);
    m.insert_opaque(W, "FUSE_READDIRPLUS");

    m.insert(R, "FUSE_GETLK", &["fuse_lk_in"]);
    m.insert(W, "FUSE_GETLK", &["fuse_lk_out"]);

    m.insert(R, "FUSE_SETLK", &["fuse_lk_in"]);
    m.insert(W, "FUSE_SETLK", &[]);

    m.insert(R, "FUSE_SETLKW", &["fuse_lk_in"]);
    m.insert(W, "FUSE_SETLKW", &[]);

    m.insert(R, "FUSE_ACCESS", &["fuse_access_in"]);
    m.insert(W, "FUSE_ACCESS", &[]);

    m.insert(R, "FUSE_CREATE", &["fuse_create_in", "string"]);
    m.insert(W, "FUSE_CREATE", &["fuse_entry_out", "fuse_open_out"]);

    m.insert(R, "FUSE_INTERRUPT", &["fuse_interrupt_in"]);

    m.insert(R, "FUSE_BMAP", &["fuse_bmap_in"]);
    m.insert(W, "FUSE_BMAP", &["fuse_bmap_out"]);

    m.insert(R, "FUSE_DESTROY", &[]);
    m.insert(W, "FUSE_DESTROY", &[]);

    // no per-field description available for the ioctl/poll families
    m.insert_opaque(R, "FUSE_IOCTL");
    m.insert_opaque(W, "FUSE_IOCTL");
    m.insert_opaque(R, "FUSE_POLL");
    m.insert_opaque(W, "FUSE_POLL");
    m.insert_opaque(R, "FUSE_NOTIFY_REPLY");

    m.insert(R, "FUSE_FALLOCATE", &["fuse_fallocate_in"]);
    m.insert(W, "FUSE_FALLOCATE", &[]);

    m.insert(R, "FUSE_LSEEK", &["fuse_lseek_in"]);
    m.insert(W, "FUSE_LSEEK", &["fuse_lseek_out"]);

    m.insert(R, "FUSE_COPY_FILE_RANGE", &["fuse_copy_file_range_in"]);
    m.insert(W, "FUSE_COPY_FILE_RANGE", &["fuse_write_out"]);

    m
}
